//! The coprocessor's command loop: one framed request in, one framed
//! response out, strictly in turn.

use log::trace;

use crate::constants::{ADDR_SIZE, MAX_DATA_LENGTH};
use crate::device::bus::{Bus, BusMode};
use crate::device::flash;
use crate::device::port::BusPort;
use crate::device::serial::Link;
use crate::protocol::{Command, Packet, PacketError, Status, read_addr};

/// A request whose data field does not fit the command's layout. Reported to
/// the host as [`Status::UnknownCommand`]; frame alignment is unaffected
/// because the data field has already been drained.
struct BadRequest;

impl From<PacketError> for BadRequest {
    fn from(_: PacketError) -> Self {
        BadRequest
    }
}

/// Pull the leading address off a request data field.
fn split_addr(data: &[u8]) -> Result<(u32, &[u8]), BadRequest> {
    let (addr_bytes, rest) = data.split_at_checked(ADDR_SIZE).ok_or(BadRequest)?;
    Ok((read_addr(addr_bytes), rest))
}

/// Device-side command dispatcher.
///
/// Owns the bus port and the serial link; everything runs in the caller's
/// (single) thread. The per-iteration state machine reads the header byte,
/// the length byte and exactly `data_len` data bytes, executes the command,
/// and writes the response frame before looking at the next byte, so the
/// stream can never lose frame alignment.
pub struct Dispatcher<P: BusPort, L: Link> {
    port: P,
    link: L,
    data: [u8; MAX_DATA_LENGTH],
}

impl<P: BusPort, L: Link> Dispatcher<P, L> {
    pub fn new(port: P, link: L) -> Self {
        Dispatcher {
            port,
            link,
            data: [0; MAX_DATA_LENGTH],
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Serve commands until the link fails. On the device the link never
    /// fails and this never returns.
    pub fn run(&mut self) -> Result<(), L::Error> {
        loop {
            self.poll_once()?;
        }
    }

    /// Serve exactly one command: read a full request frame, execute it,
    /// write the response frame.
    pub fn poll_once(&mut self) -> Result<(), L::Error> {
        let header = self.link.read_byte()?;
        let data_len = self.link.read_byte()? as usize;
        // Always consume the declared data, known command or not.
        for slot in &mut self.data[..data_len] {
            *slot = self.link.read_byte()?;
        }
        trace!("request {header:#04x} with {data_len} data bytes");

        let response = Self::dispatch(&mut self.port, header, &self.data[..data_len]);
        for byte in response.encode() {
            self.link.write_byte(byte)?;
        }
        Ok(())
    }

    fn dispatch(port: &mut P, header: u8, data: &[u8]) -> Packet {
        let Some(command) = Command::from_u8(header) else {
            trace!("unknown command {header:#04x}");
            return Packet::response(Status::UnknownCommand);
        };
        let result = match command {
            Command::Ping => Ok(Packet::response(Status::Success)),
            Command::Write => Self::cmd_write(port, data),
            Command::Read => Self::cmd_read(port, data),
            Command::WriteFlash => Self::cmd_write_flash(port, data),
            Command::FlashId => Self::cmd_flash_id(port),
            Command::EraseSector => Self::cmd_erase_sector(port, data),
            Command::EraseChip => Self::cmd_erase_chip(port),
        };
        match result {
            Ok(response) => response,
            Err(BadRequest) => Packet::response(Status::UnknownCommand),
        }
    }

    fn cmd_write(port: &mut P, data: &[u8]) -> Result<Packet, BadRequest> {
        let (address, payload) = split_addr(data)?;
        let Ok(mut bus) = Bus::acquire(port) else {
            return Ok(Packet::response(Status::BusAcquireTimeout));
        };
        bus.set_mode(BusMode::WriteMem);
        for (i, &value) in payload.iter().enumerate() {
            bus.write_mem(address + i as u32, value);
        }
        Ok(Packet::response(Status::Success))
    }

    fn cmd_read(port: &mut P, data: &[u8]) -> Result<Packet, BadRequest> {
        let (address, rest) = split_addr(data)?;
        let &amount = rest.first().ok_or(BadRequest)?;
        let Ok(mut bus) = Bus::acquire(port) else {
            return Ok(Packet::response(Status::BusAcquireTimeout));
        };
        bus.set_mode(BusMode::ReadMem);
        let mut response = Packet::response(Status::Success);
        for i in 0..amount as u32 {
            response.append_u8(bus.read(address + i))?;
        }
        Ok(response)
    }

    fn cmd_write_flash(port: &mut P, data: &[u8]) -> Result<Packet, BadRequest> {
        let (address, payload) = split_addr(data)?;
        let Ok(mut bus) = Bus::acquire(port) else {
            return Ok(Packet::response(Status::BusAcquireTimeout));
        };
        for (i, &value) in payload.iter().enumerate() {
            flash::byte_program(&mut bus, address + i as u32, value);
        }
        Ok(Packet::response(Status::Success))
    }

    fn cmd_flash_id(port: &mut P) -> Result<Packet, BadRequest> {
        let Ok(mut bus) = Bus::acquire(port) else {
            return Ok(Packet::response(Status::BusAcquireTimeout));
        };
        let id = flash::software_id(&mut bus);
        let mut response = Packet::response(Status::Success);
        response.append(&[id.manufacturer, id.device])?;
        Ok(response)
    }

    fn cmd_erase_sector(port: &mut P, data: &[u8]) -> Result<Packet, BadRequest> {
        let (address, _) = split_addr(data)?;
        let Ok(mut bus) = Bus::acquire(port) else {
            return Ok(Packet::response(Status::BusAcquireTimeout));
        };
        flash::erase_sector(&mut bus, address);
        Ok(Packet::response(Status::Success))
    }

    fn cmd_erase_chip(port: &mut P) -> Result<Packet, BadRequest> {
        let Ok(mut bus) = Bus::acquire(port) else {
            return Ok(Packet::response(Status::BusAcquireTimeout));
        };
        flash::erase_chip(&mut bus);
        Ok(Packet::response(Status::Success))
    }
}
