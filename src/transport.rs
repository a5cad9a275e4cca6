//! Abstract host-side connection to the coprocessor.

use std::io::{self, Read, Write};

/// A byte-oriented, blocking connection to the device.
///
/// Opening and configuring the underlying channel (port selection, baud
/// rate, framing, read timeout) is the front end's business; this crate only
/// writes request frames and reads response bytes. A read timeout configured
/// on the underlying device is what turns a dead coprocessor into an error
/// instead of a hang.
pub trait Connection {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn read_byte(&mut self) -> io::Result<u8>;
}

/// Any blocking reader/writer works as a connection: an opened serial port,
/// a TCP stream, or an in-process simulator.
impl<T: Read + Write> Connection for T {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(self, bytes)?;
        self.flush()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}
