//! Wire-format, address-space and target-hardware constants.

/// Offset of the header byte in an encoded frame.
pub const FIELD_HDR: usize = 0;
/// Offset of the data-length byte in an encoded frame.
pub const FIELD_DATA_LEN: usize = 1;
/// Offset of the first data byte in an encoded frame.
pub const FIELD_DATA: usize = 2;

/// The data-length field is one byte.
pub const MAX_DATA_LENGTH: usize = 255;
/// A frame with an empty data field.
pub const MIN_MSG_LENGTH: usize = 2;
pub const MAX_MSG_LENGTH: usize = MIN_MSG_LENGTH + MAX_DATA_LENGTH;

/// On-wire size of a target address: 3 bytes, little endian.
pub const ADDR_SIZE: usize = 3;

/// Largest amount a single `Read` request may ask for. The read request
/// carries an address, so the device reuses the same scratch packet for the
/// response and cannot return more than this per round trip.
pub const MAX_READ_AMOUNT: usize = MAX_DATA_LENGTH - ADDR_SIZE;

pub mod addrspace {
    //! The target's 18-bit address space: flash in the low half, ram in the
    //! high half, selected by the most significant address bit.

    pub const ADDR_BITS: u32 = 18;
    pub const SIZE: u32 = 1 << ADDR_BITS;
    /// Mask of the address bit that selects the ram chip.
    pub const RAM_MASK: u32 = SIZE >> 1;

    pub const FLASH_START: u32 = 0;
    pub const FLASH_END: u32 = RAM_MASK;
    pub const FLASH_SIZE: u32 = FLASH_END - FLASH_START;

    pub const RAM_START: u32 = FLASH_END;
    pub const RAM_END: u32 = SIZE;
    pub const RAM_SIZE: u32 = RAM_END - RAM_START;

    pub const fn is_ram_addr(address: u32) -> bool {
        address & RAM_MASK != 0
    }

    pub const fn is_flash_addr(address: u32) -> bool {
        address & RAM_MASK == 0
    }
}

pub mod flash {
    //! Command set of the target's parallel flash chip (SST39SF family).
    //!
    //! Every mutation is prefixed by a fixed unlock sequence of magic
    //! address/byte writes; the addresses are chip addresses, not decoded
    //! through the ram/flash partition.

    /// Sectors are 16 KiB, aligned to 16 KiB, and erased atomically.
    pub const SECTOR_SIZE: u32 = 0x4000;

    pub const UNLOCK_ADDR1: u32 = 0x5555;
    pub const UNLOCK_ADDR2: u32 = 0x2AAA;
    pub const UNLOCK_BYTE1: u8 = 0xAA;
    pub const UNLOCK_BYTE2: u8 = 0x55;

    pub const CMD_BYTE_PROGRAM: u8 = 0xA0;
    pub const CMD_ERASE_SETUP: u8 = 0x80;
    pub const CMD_ERASE_SECTOR: u8 = 0x30;
    pub const CMD_ERASE_CHIP: u8 = 0x10;
    pub const CMD_ENTER_SOFTWARE_ID: u8 = 0x90;
    pub const CMD_EXIT_SOFTWARE_ID: u8 = 0xF0;

    /// Chip addresses that hold the software ID while ID mode is active.
    pub const SOFTWARE_ID_MFG_ADDR: u32 = 0x0000;
    pub const SOFTWARE_ID_DEV_ADDR: u32 = 0x0001;
}

pub mod timing {
    //! Delays between pin transitions, found partly in the flash datasheet
    //! and partly by experimentation on the real board.

    /// Settle time after driving the address or data pins.
    pub const PIN_DELAY_US: u32 = 1;
    /// Maximum byte-program time from the flash datasheet.
    pub const FLASH_WRITE_DELAY_US: u32 = 20;
    /// Maximum sector-erase time from the flash datasheet.
    pub const SECTOR_ERASE_DELAY_US: u32 = 25_000;
    /// Maximum chip-erase time from the flash datasheet.
    pub const CHIP_ERASE_DELAY_US: u32 = 100_000;

    /// Interval at which the bus-acknowledge pin is polled while acquiring.
    pub const BUS_ACQUIRE_POLL_US: u32 = 10;
    /// Number of polls before a bus acquisition is declared failed.
    pub const BUS_ACQUIRE_POLL_LIMIT: u32 = 1000;
}
