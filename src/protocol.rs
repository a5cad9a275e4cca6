//! The framed Binary Debug Protocol spoken between host and coprocessor.
//!
//! Every message is `[header, data_len, data...]` with at most 255 data
//! bytes. Requests carry a [`Command`] in the header byte, responses a
//! [`Status`]. The codec here is shared vocabulary; the device side decodes
//! requests byte by byte off the serial link, the host side builds requests
//! with [`Packet`] and reads responses field by field.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::constants::{
    ADDR_SIZE, FIELD_DATA, FIELD_DATA_LEN, FIELD_HDR, MAX_DATA_LENGTH, MIN_MSG_LENGTH, addrspace,
};

/// Request header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Check that the device is online. No data, Success response is empty.
    Ping = 0x01,
    /// Write to target memory. Data is an address followed by the bytes to
    /// store; the whole range must lie in the ram region.
    Write = 0x02,
    /// Read from target memory. Data is an address and a one-byte amount;
    /// the Success response carries exactly that many bytes.
    Read = 0x03,
    /// Program target flash. Same data layout as `Write`; each byte is
    /// AND-ed into the (previously erased) flash contents.
    WriteFlash = 0x04,
    /// Query the flash chip's software ID. No data; the Success response is
    /// the manufacturer byte followed by the device byte.
    FlashId = 0x05,
    /// Erase the flash sector containing the address in the data field.
    EraseSector = 0x06,
    /// Erase the entire flash chip. No data.
    EraseChip = 0x07,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Command> {
        match value {
            0x01 => Some(Command::Ping),
            0x02 => Some(Command::Write),
            0x03 => Some(Command::Read),
            0x04 => Some(Command::WriteFlash),
            0x05 => Some(Command::FlashId),
            0x06 => Some(Command::EraseSector),
            0x07 => Some(Command::EraseChip),
            _ => None,
        }
    }
}

/// Response header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Request carried out; data depends on the request.
    Success = 0x01,
    /// Request header contained a command the device does not know, or the
    /// data field did not match the command's layout. Data is empty.
    UnknownCommand = 0x02,
    /// The target CPU never released the bus; the operation was skipped
    /// entirely. Data is empty.
    BusAcquireTimeout = 0x03,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Status> {
        match value {
            0x01 => Some(Status::Success),
            0x02 => Some(Status::UnknownCommand),
            0x03 => Some(Status::BusAcquireTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::UnknownCommand => "unknown command",
            Status::BusAcquireTimeout => "bus acquisition timed out",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// An append would have grown the data field past 255 bytes.
    #[error("packet capacity exceeded: {requested} bytes requested, {available} available")]
    CapacityExceeded { requested: usize, available: usize },
    /// A frame was shorter than its mandatory two fields.
    #[error("frame truncated: {0} bytes, need at least 2")]
    TooShort(usize),
    /// A frame's data did not match its length byte.
    #[error("frame length mismatch: length byte says {expected} data bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// One protocol message under construction or decoded off the wire.
///
/// The data field grows through the capacity-checked `append` family and is
/// never allowed past [`MAX_DATA_LENGTH`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: u8,
    data: Vec<u8>,
}

impl Packet {
    /// Start an empty request.
    pub fn request(command: Command) -> Packet {
        Packet {
            header: command as u8,
            data: Vec::new(),
        }
    }

    /// Start an empty response.
    pub fn response(status: Status) -> Packet {
        Packet {
            header: status as u8,
            data: Vec::new(),
        }
    }

    pub fn header(&self) -> u8 {
        self.header
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Number of data bytes that can still be appended.
    pub fn free_capacity(&self) -> usize {
        MAX_DATA_LENGTH - self.data.len()
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        if bytes.len() > self.free_capacity() {
            return Err(PacketError::CapacityExceeded {
                requested: bytes.len(),
                available: self.free_capacity(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn append_u8(&mut self, value: u8) -> Result<(), PacketError> {
        self.append(&[value])
    }

    /// Append a target address as 3 little-endian bytes, masked to the
    /// 18 bits the bus actually decodes.
    pub fn append_addr(&mut self, address: u32) -> Result<(), PacketError> {
        let mut bytes = [0u8; ADDR_SIZE];
        LittleEndian::write_u24(&mut bytes, address & (addrspace::SIZE - 1));
        self.append(&bytes)
    }

    /// Encode into the on-wire frame `[header, data_len, data...]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MIN_MSG_LENGTH + self.data.len());
        frame.push(self.header);
        frame.push(self.data.len() as u8);
        frame.extend_from_slice(&self.data);
        frame
    }

    /// Decode a complete frame.
    pub fn decode(frame: &[u8]) -> Result<Packet, PacketError> {
        if frame.len() < MIN_MSG_LENGTH {
            return Err(PacketError::TooShort(frame.len()));
        }
        let expected = frame[FIELD_DATA_LEN] as usize;
        let actual = frame.len() - FIELD_DATA;
        if expected != actual {
            return Err(PacketError::LengthMismatch { expected, actual });
        }
        Ok(Packet {
            header: frame[FIELD_HDR],
            data: frame[FIELD_DATA..].to_vec(),
        })
    }
}

/// Read a 3-byte little-endian target address. The slice must hold at least
/// [`ADDR_SIZE`] bytes.
pub fn read_addr(bytes: &[u8]) -> u32 {
    LittleEndian::read_u24(bytes) & (addrspace::SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_request_round_trip() {
        let mut packet = Packet::request(Command::Write);
        packet.append_addr(0x1234).unwrap();
        packet.append(&[0xAA, 0xBB]).unwrap();

        let frame = packet.encode();
        assert_eq!(frame, [0x02, 0x05, 0x34, 0x12, 0x00, 0xAA, 0xBB]);

        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(Command::from_u8(decoded.header()), Some(Command::Write));
        assert_eq!(read_addr(decoded.data()), 0x1234);
        assert_eq!(&decoded.data()[ADDR_SIZE..], [0xAA, 0xBB]);
    }

    #[test]
    fn append_checks_capacity() {
        let mut packet = Packet::request(Command::Write);
        packet.append(&[0u8; 250]).unwrap();
        assert_eq!(packet.free_capacity(), 5);

        let err = packet.append(&[0u8; 6]).unwrap_err();
        assert_eq!(
            err,
            PacketError::CapacityExceeded {
                requested: 6,
                available: 5
            }
        );
        // The failed append must not have changed the packet.
        assert_eq!(packet.data_len(), 250);

        packet.append(&[0u8; 5]).unwrap();
        assert_eq!(packet.free_capacity(), 0);
    }

    #[test]
    fn addresses_are_masked_to_the_bus_width() {
        let mut packet = Packet::request(Command::EraseSector);
        packet.append_addr(0xFFFF_FFFF).unwrap();
        assert_eq!(packet.data(), [0xFF, 0xFF, 0x03]);
        assert_eq!(read_addr(packet.data()), addrspace::SIZE - 1);
    }

    #[test]
    fn decode_rejects_malformed_frames() {
        assert_eq!(Packet::decode(&[0x01]), Err(PacketError::TooShort(1)));
        assert_eq!(
            Packet::decode(&[0x01, 0x02, 0xAA]),
            Err(PacketError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn header_bytes_are_closed_sets() {
        assert_eq!(Command::from_u8(0x07), Some(Command::EraseChip));
        assert_eq!(Command::from_u8(0x08), None);
        assert_eq!(Command::from_u8(0xFF), None);
        assert_eq!(Status::from_u8(0x03), Some(Status::BusAcquireTimeout));
        assert_eq!(Status::from_u8(0x00), None);
    }
}
