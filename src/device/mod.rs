//! Coprocessor-side core: bus ownership, flash programming, serial plumbing
//! and the command dispatch loop.
//!
//! Everything here runs in the device's single main-loop context. Hardware
//! access goes through the [`port::BusPort`] capability so the same code
//! drives the real pin layer on the board and [`sim::SimBus`] in tests.

pub mod bus;
pub mod dispatcher;
pub mod flash;
pub mod port;
pub mod serial;
pub mod sim;

pub use self::bus::{AcquireTimeout, Bus, BusMode};
pub use self::dispatcher::Dispatcher;
pub use self::port::{BusPort, PinDir};
pub use self::serial::{Link, RxRing};
