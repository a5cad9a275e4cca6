//! Binary Debug Protocol (BDBP) implementation, host and coprocessor side.
//!
//! BDBP is the half-duplex serial protocol between a host machine and the
//! coprocessor that can steal the bus of a Z80-based computer to inspect and
//! reprogram its memory and flash. This crate holds both ends:
//!
//! - [`protocol`] is the shared packet codec.
//! - [`target`] and [`transport`] are the host side: a [`Target`] handle
//!   splits arbitrary-length reads and writes into protocol-sized packets
//!   over any byte [`Connection`].
//! - [`device`] is the coprocessor side: the command dispatcher, the bus
//!   ownership handshake, the flash programming algorithm and the serial
//!   receive ring, all over a pluggable bus port so the whole stack also
//!   runs against [`device::sim::SimBus`] in tests.
//!
//! The front end (REPL, argument parsing, opening the serial device) and the
//! board's pin layer live elsewhere; they plug into the [`Connection`],
//! [`device::BusPort`] and [`device::Link`] traits.

pub mod constants;
pub mod device;
pub mod protocol;
pub mod target;
pub mod transport;

pub use self::device::flash::SoftwareId;
pub use self::protocol::{Command, Packet, PacketError, Status};
pub use self::target::{Target, TargetError, WriteOp};
pub use self::transport::Connection;
