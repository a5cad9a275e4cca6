//! In-system programming of the target's parallel flash chip.
//!
//! The chip accepts commands as sequences of magic address/data writes, each
//! strobed through the flash write-enable line. Mutations need one unlock
//! round (program) or two (erase); afterwards the chip is busy for a fixed
//! settle time. All of this requires the bus to be held.

use crate::constants::{addrspace, flash, timing};
use crate::device::bus::Bus;
use crate::device::port::BusPort;

/// Manufacturer and device byte reported by the chip's software-ID mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareId {
    pub manufacturer: u8,
    pub device: u8,
}

/// The common unlock prefix shared by every flash command.
fn unlock<P: BusPort>(bus: &mut Bus<'_, P>) {
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::UNLOCK_BYTE1);
    bus.flash_cmd(flash::UNLOCK_ADDR2, flash::UNLOCK_BYTE2);
}

/// Program a single byte. The byte is AND-ed into the current contents, so
/// the containing sector should have been erased for a plain store.
///
/// Addresses outside the flash region are ignored; the ram region is never
/// reachable through the flash strobe.
pub fn byte_program<P: BusPort>(bus: &mut Bus<'_, P>, address: u32, value: u8) {
    if !addrspace::is_flash_addr(address) {
        return;
    }
    bus.begin_flash_cmd();
    unlock(bus);
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::CMD_BYTE_PROGRAM);
    bus.flash_cmd(address, value);
    bus.delay_us(timing::FLASH_WRITE_DELAY_US);
    bus.end_flash_cmd();
}

/// Read the chip's manufacturer and device ID.
pub fn software_id<P: BusPort>(bus: &mut Bus<'_, P>) -> SoftwareId {
    bus.begin_flash_cmd();
    unlock(bus);
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::CMD_ENTER_SOFTWARE_ID);
    bus.end_flash_cmd();

    // end_flash_cmd left the data bus readable.
    let manufacturer = bus.read(flash::SOFTWARE_ID_MFG_ADDR);
    let device = bus.read(flash::SOFTWARE_ID_DEV_ADDR);

    bus.begin_flash_cmd();
    unlock(bus);
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::CMD_EXIT_SOFTWARE_ID);
    bus.end_flash_cmd();

    SoftwareId {
        manufacturer,
        device,
    }
}

/// Erase the sector containing `address`, setting every byte in it to 0xFF.
/// Addresses outside the flash region are ignored.
pub fn erase_sector<P: BusPort>(bus: &mut Bus<'_, P>, address: u32) {
    if !addrspace::is_flash_addr(address) {
        return;
    }
    let sector = address & !(flash::SECTOR_SIZE - 1);
    bus.begin_flash_cmd();
    unlock(bus);
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::CMD_ERASE_SETUP);
    unlock(bus);
    bus.flash_cmd(sector, flash::CMD_ERASE_SECTOR);
    bus.delay_us(timing::SECTOR_ERASE_DELAY_US);
    bus.end_flash_cmd();
}

/// Erase the entire chip to 0xFF.
pub fn erase_chip<P: BusPort>(bus: &mut Bus<'_, P>) {
    bus.begin_flash_cmd();
    unlock(bus);
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::CMD_ERASE_SETUP);
    unlock(bus);
    bus.flash_cmd(flash::UNLOCK_ADDR1, flash::CMD_ERASE_CHIP);
    bus.delay_us(timing::CHIP_ERASE_DELAY_US);
    bus.end_flash_cmd();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimBus;

    fn with_bus<R>(sim: &mut SimBus, f: impl FnOnce(&mut Bus<'_, SimBus>) -> R) -> R {
        let mut bus = Bus::acquire(sim).unwrap();
        f(&mut bus)
    }

    #[test]
    fn program_ands_into_existing_content() {
        let mut sim = SimBus::new();
        with_bus(&mut sim, |bus| {
            byte_program(bus, 0x0100, 0x42);
        });
        assert_eq!(sim.mem(0x0100), 0x42);

        // Programming can only clear bits, never set them.
        with_bus(&mut sim, |bus| {
            byte_program(bus, 0x0100, 0xF0);
        });
        assert_eq!(sim.mem(0x0100), 0x40);
    }

    #[test]
    fn program_outside_flash_is_a_no_op() {
        let mut sim = SimBus::new();
        let ram_addr = crate::constants::addrspace::RAM_START + 4;
        with_bus(&mut sim, |bus| {
            byte_program(bus, ram_addr, 0x00);
        });
        assert_eq!(sim.mem(ram_addr), 0x00, "untouched ram default");
        // No flash byte changed either.
        assert_eq!(sim.mem(0x0004), 0xFF);
    }

    #[test]
    fn erase_sector_clears_exactly_one_sector() {
        let mut sim = SimBus::new();
        with_bus(&mut sim, |bus| {
            byte_program(bus, 0x3FFF, 0x11);
            byte_program(bus, 0x4000, 0x22);
            byte_program(bus, 0x5555, 0x33);
            byte_program(bus, 0x7FFF, 0x44);
            byte_program(bus, 0x8000, 0x55);
        });

        // Any address inside the sector selects it.
        with_bus(&mut sim, |bus| {
            erase_sector(bus, 0x4123);
        });

        assert_eq!(sim.mem(0x3FFF), 0x11, "previous sector untouched");
        for address in 0x4000..0x8000 {
            assert_eq!(sim.mem(address), 0xFF, "byte {address:#07x} not erased");
        }
        assert_eq!(sim.mem(0x8000), 0x55, "next sector untouched");
    }

    #[test]
    fn erase_chip_clears_everything() {
        let mut sim = SimBus::new();
        with_bus(&mut sim, |bus| {
            byte_program(bus, 0x0000, 0x00);
            byte_program(bus, 0x1FFFF, 0x00);
            erase_chip(bus);
        });
        assert_eq!(sim.mem(0x0000), 0xFF);
        assert_eq!(sim.mem(0x1FFFF), 0xFF);
    }

    #[test]
    fn software_id_reports_and_restores() {
        let mut sim = SimBus::new();
        with_bus(&mut sim, |bus| {
            byte_program(bus, 0x0000, 0x12);
            byte_program(bus, 0x0001, 0x34);

            let id = software_id(bus);
            assert_eq!(id.manufacturer, 0xBF);
            assert_eq!(id.device, 0xB7);

            // ID mode exited again: normal array reads resume.
            bus.set_mode(crate::device::bus::BusMode::ReadMem);
            assert_eq!(bus.read(0x0000), 0x12);
            assert_eq!(bus.read(0x0001), 0x34);
        });
    }

    #[test]
    fn erase_waits_out_the_settle_time() {
        let mut sim = SimBus::new();
        let before = sim.total_delay_us();
        with_bus(&mut sim, |bus| {
            erase_sector(bus, 0x0000);
        });
        assert!(
            sim.total_delay_us() - before >= timing::SECTOR_ERASE_DELAY_US as u64,
            "sector erase must include the datasheet settle delay"
        );
    }
}
