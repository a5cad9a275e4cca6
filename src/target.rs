//! Host-side target access: request building, response handling, chunking.
//!
//! [`Target`] wraps a [`Connection`] and turns logical operations of
//! arbitrary length into sequences of protocol-legal packets. Address-range
//! checks happen here, before anything reaches the wire; device status codes
//! come back as typed [`TargetError`] values inside the [`anyhow`] chain.

use anyhow::{Context, Result};

use crate::constants::{MAX_READ_AMOUNT, addrspace};
use crate::device::flash::SoftwareId;
use crate::protocol::{Command, Packet, Status};
use crate::transport::Connection;

/// Failure reasons a caller may want to tell apart, reachable through
/// `anyhow::Error::downcast_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// The device answered with a non-success status.
    #[error("device reported failure: {0}")]
    Device(Status),
    /// The device answered with a header byte that is no known status; the
    /// connection is likely out of sync.
    #[error("invalid status byte {0:#04x} in response")]
    InvalidStatus(u8),
    /// The requested range does not fit the region the operation targets.
    #[error("{length} bytes at {address:#07x} do not fit in the {region} address range")]
    OutOfRange {
        address: u32,
        length: usize,
        region: &'static str,
    },
}

/// A contiguous slice of a larger write, before it becomes a packet. The
/// payload bytes stay in the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOp {
    pub address: u32,
    pub length: usize,
}

/// Split `length` bytes starting at `address` into per-packet operations of
/// at most `max_chunk` bytes, in strictly increasing address order.
fn chunk_ops(address: u32, length: usize, max_chunk: usize) -> impl Iterator<Item = WriteOp> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        if offset >= length {
            return None;
        }
        let chunk = (length - offset).min(max_chunk);
        let op = WriteOp {
            address: address + offset as u32,
            length: chunk,
        };
        offset += chunk;
        Some(op)
    })
}

fn check_range(
    address: u32,
    length: usize,
    start: u32,
    end: u32,
    region: &'static str,
) -> std::result::Result<(), TargetError> {
    let fits = address >= start && address as u64 + length as u64 <= end as u64;
    if fits {
        Ok(())
    } else {
        Err(TargetError::OutOfRange {
            address,
            length,
            region,
        })
    }
}

/// Handle on the debugged machine, speaking BDBP over a connection.
pub struct Target<C: Connection> {
    conn: C,
}

impl<C: Connection> Target<C> {
    pub fn new(conn: C) -> Self {
        Target { conn }
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Execute one request/response round trip.
    ///
    /// Writes the full frame, then reads the status byte, the length byte
    /// and exactly that many data bytes. Returns the response data on
    /// success; a non-success status fails with [`TargetError::Device`]
    /// after the (empty) response has been consumed, so the stream stays
    /// aligned for the next command.
    pub fn exec(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        let frame = packet.encode();
        log::debug!("=> {}", hex::encode(&frame));
        self.conn
            .write_all(&frame)
            .context("failed to write request frame")?;

        let status_byte = self
            .conn
            .read_byte()
            .context("failed to read response status")?;
        let status = Status::from_u8(status_byte).ok_or(TargetError::InvalidStatus(status_byte))?;
        let data_len = self
            .conn
            .read_byte()
            .context("failed to read response length")? as usize;
        let mut data = vec![0u8; data_len];
        for slot in &mut data {
            *slot = self
                .conn
                .read_byte()
                .context("failed to read response data")?;
        }
        log::debug!("<= {:02x} {:02x} {}", status_byte, data_len, hex::encode(&data));

        if status != Status::Success {
            return Err(TargetError::Device(status).into());
        }
        Ok(data)
    }

    /// Check that the device is online.
    pub fn ping(&mut self) -> Result<()> {
        self.exec(&Packet::request(Command::Ping))?;
        Ok(())
    }

    /// Read `buffer.len()` bytes of target memory starting at `address`,
    /// splitting into as many read requests as needed. Reads may span the
    /// flash/ram boundary.
    pub fn read_memory(&mut self, address: u32, buffer: &mut [u8]) -> Result<()> {
        check_range(address, buffer.len(), 0, addrspace::SIZE, "target")?;
        let mut cursor = address;
        for chunk in buffer.chunks_mut(MAX_READ_AMOUNT) {
            let mut packet = Packet::request(Command::Read);
            packet.append_addr(cursor)?;
            packet.append_u8(chunk.len() as u8)?;
            let data = self.exec(&packet)?;
            anyhow::ensure!(
                data.len() == chunk.len(),
                "device returned {} bytes, expected {}",
                data.len(),
                chunk.len()
            );
            chunk.copy_from_slice(&data);
            cursor += chunk.len() as u32;
        }
        Ok(())
    }

    /// Write `data` to target ram starting at `address`. The whole range
    /// must lie inside the ram region; flash is written with
    /// [`Target::write_flash`].
    ///
    /// Chunks go out in increasing address order and the first failure
    /// aborts the rest, leaving the target partially written.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_range(address, data.len(), addrspace::RAM_START, addrspace::RAM_END, "ram")?;
        log::debug!("writing {} bytes to ram at {:#07x}", data.len(), address);
        self.write_chunked(Command::Write, address, data)
    }

    /// Program `data` into target flash starting at `address`. Bytes are
    /// AND-ed into the current contents; erase the containing sectors first
    /// for a plain store. Same partial-write semantics as
    /// [`Target::write_memory`].
    pub fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_range(address, data.len(), addrspace::FLASH_START, addrspace::FLASH_END, "flash")?;
        log::debug!("programming {} bytes of flash at {:#07x}", data.len(), address);
        self.write_chunked(Command::WriteFlash, address, data)
    }

    /// Query the flash chip's software ID.
    pub fn flash_software_id(&mut self) -> Result<SoftwareId> {
        let data = self.exec(&Packet::request(Command::FlashId))?;
        anyhow::ensure!(
            data.len() == 2,
            "flash ID response has {} bytes, expected 2",
            data.len()
        );
        Ok(SoftwareId {
            manufacturer: data[0],
            device: data[1],
        })
    }

    /// Erase the flash sector containing `address`, restoring it to all-ones.
    pub fn erase_sector(&mut self, address: u32) -> Result<()> {
        check_range(address, 1, addrspace::FLASH_START, addrspace::FLASH_END, "flash")?;
        log::debug!("erasing flash sector containing {:#07x}", address);
        let mut packet = Packet::request(Command::EraseSector);
        packet.append_addr(address)?;
        self.exec(&packet)?;
        Ok(())
    }

    /// Erase the entire flash chip.
    pub fn erase_chip(&mut self) -> Result<()> {
        log::debug!("erasing entire flash chip");
        self.exec(&Packet::request(Command::EraseChip))?;
        Ok(())
    }

    fn write_chunked(&mut self, command: Command, address: u32, data: &[u8]) -> Result<()> {
        let max_chunk = {
            let mut probe = Packet::request(command);
            probe.append_addr(address)?;
            probe.free_capacity()
        };
        for op in chunk_ops(address, data.len(), max_chunk) {
            let start = (op.address - address) as usize;
            let mut packet = Packet::request(command);
            packet.append_addr(op.address)?;
            packet.append(&data[start..start + op.length])?;
            self.exec(&packet)?;
        }
        Ok(())
    }
}
