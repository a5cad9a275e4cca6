//! Ownership handshake for the shared target bus.
//!
//! The target CPU and the coprocessor share the address and data buses; the
//! coprocessor may only drive them after the CPU has acknowledged a bus
//! request. [`Bus`] is that ownership made scoped: it exists only while the
//! bus is held, every memory and flash primitive lives on it, and dropping
//! it always hands the bus back, on error paths included.

use log::trace;

use crate::constants::timing;
use crate::device::port::{BusPort, PinDir};

/// The target CPU never acknowledged the bus request within the poll bound.
/// The request line has been deasserted again; the bus stays with the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bus acquisition timed out")]
pub struct AcquireTimeout;

/// Bus configuration for a memory-device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    /// Data bus driven by the coprocessor, memory output disabled.
    WriteMem,
    /// Data bus listening, memory output enabled.
    ReadMem,
}

/// Exclusive ownership of the target bus.
#[derive(Debug)]
pub struct Bus<'a, P: BusPort> {
    port: &'a mut P,
}

impl<'a, P: BusPort> Bus<'a, P> {
    /// Take the bus away from the target CPU.
    ///
    /// If the acknowledge line already reports the bus as free the request
    /// line is left alone; otherwise it is asserted and the acknowledge line
    /// polled at a fixed interval up to a bounded number of iterations. On
    /// timeout the request is withdrawn and no pin has been driven. On
    /// success the port is put into a known collision-free state: the
    /// address bus is forced to 0 before any write-enable line is driven, so
    /// a stray address cannot cause an accidental store.
    pub fn acquire(port: &'a mut P) -> Result<Self, AcquireTimeout> {
        if !port.bus_acknowledged() {
            port.set_bus_request(true);
            let mut polls = 0;
            while !port.bus_acknowledged() {
                if polls >= timing::BUS_ACQUIRE_POLL_LIMIT {
                    port.set_bus_request(false);
                    trace!("bus acquisition timed out after {polls} polls");
                    return Err(AcquireTimeout);
                }
                port.delay_us(timing::BUS_ACQUIRE_POLL_US);
                polls += 1;
            }
        }

        port.write_data(0);
        port.set_data_dir(PinDir::Input);

        port.write_addr(0);
        port.set_addr_dir(PinDir::Output);

        port.set_ram_write_enable(false);
        port.set_mem_output_enable(true);
        port.set_flash_write_enable(false);

        trace!("bus acquired");
        Ok(Bus { port })
    }

    /// Hand the bus back explicitly. Dropping the guard does the same.
    pub fn release(self) {}

    pub fn set_mode(&mut self, mode: BusMode) {
        match mode {
            BusMode::WriteMem => {
                self.port.set_mem_output_enable(false);
                self.port.set_data_dir(PinDir::Output);
            }
            BusMode::ReadMem => {
                self.port.set_mem_output_enable(true);
                self.port.set_data_dir(PinDir::Input);
                self.port.write_data(0);
            }
        }
    }

    /// Store one byte through the ram write strobe. Requires
    /// [`BusMode::WriteMem`].
    pub fn write_mem(&mut self, address: u32, value: u8) {
        self.port.write_addr(address);
        self.port.write_data(value);
        self.port.delay_us(timing::PIN_DELAY_US);
        self.pulse_ram_write();
    }

    /// Fetch one byte off the bus. Requires [`BusMode::ReadMem`].
    pub fn read(&mut self, address: u32) -> u8 {
        self.port.write_addr(address);
        self.port.delay_us(timing::PIN_DELAY_US);
        self.port.read_data()
    }

    /// Put the bus into flash-command mode: coprocessor drives the data
    /// pins, memory output is off so the flash chip does not contend.
    pub fn begin_flash_cmd(&mut self) {
        self.port.set_data_dir(PinDir::Output);
        self.port.set_mem_output_enable(false);
    }

    /// Undo [`Bus::begin_flash_cmd`], back to a readable bus.
    pub fn end_flash_cmd(&mut self) {
        self.port.set_mem_output_enable(true);
        self.port.set_data_dir(PinDir::Input);
        self.port.write_data(0);
        self.port.delay_us(timing::PIN_DELAY_US);
    }

    /// Write one address/data pair to the flash chip, strobed through the
    /// flash write-enable line. Requires flash-command mode.
    pub fn flash_cmd(&mut self, address: u32, value: u8) {
        self.port.write_addr(address);
        self.port.write_data(value);
        self.port.delay_us(timing::PIN_DELAY_US);
        self.pulse_flash_write();
    }

    pub fn delay_us(&mut self, us: u32) {
        self.port.delay_us(us);
    }

    fn pulse_ram_write(&mut self) {
        self.port.set_ram_write_enable(true);
        self.port.delay_us(timing::PIN_DELAY_US);
        self.port.set_ram_write_enable(false);
        self.port.delay_us(timing::PIN_DELAY_US);
    }

    fn pulse_flash_write(&mut self) {
        self.port.set_flash_write_enable(true);
        self.port.delay_us(timing::PIN_DELAY_US);
        self.port.set_flash_write_enable(false);
        self.port.delay_us(timing::PIN_DELAY_US);
    }
}

impl<P: BusPort> Drop for Bus<'_, P> {
    /// Release sequence, mirroring acquisition: quiesce the data bus, force
    /// the address to 0 before letting go of the write-enable lines, stop
    /// driving everything, then withdraw the bus request and wait for the
    /// target CPU to take over again. The final wait is unbounded: walking
    /// away with the bus in a half-released state is worse than a slow
    /// release.
    fn drop(&mut self) {
        self.port.write_data(0);
        self.port.set_data_dir(PinDir::Input);

        self.port.write_addr(0);
        self.port.set_ram_write_enable(false);
        self.port.set_mem_output_enable(false);
        self.port.set_flash_write_enable(false);
        self.port.set_addr_dir(PinDir::Input);

        self.port.set_bus_request(false);
        while self.port.bus_acknowledged() {
            self.port.delay_us(timing::PIN_DELAY_US);
        }
        trace!("bus released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimBus;

    #[test]
    fn acquire_and_release_handshake() {
        let mut sim = SimBus::new();
        {
            let bus = Bus::acquire(&mut sim).unwrap();
            bus.release();
        }
        assert!(!sim.bus_requested());
        assert!(!sim.ram_write_enabled());
        assert!(!sim.flash_write_enabled());
        assert_eq!(sim.addr_dir(), PinDir::Input);
    }

    #[test]
    fn acquire_retries_until_acknowledged() {
        let mut sim = SimBus::acknowledge_after(5);
        let bus = Bus::acquire(&mut sim).unwrap();
        bus.release();
        assert!(
            sim.total_delay_us() >= (5 * timing::BUS_ACQUIRE_POLL_US) as u64,
            "each unanswered poll must wait out the poll interval"
        );
    }

    #[test]
    fn acquire_times_out_within_the_poll_bound() {
        let mut sim = SimBus::never_acknowledge();
        let err = Bus::acquire(&mut sim).unwrap_err();
        assert_eq!(err, AcquireTimeout);

        // The request was withdrawn and no write-enable line is left driven.
        assert!(!sim.bus_requested());
        assert!(!sim.ram_write_enabled());
        assert!(!sim.flash_write_enabled());
        // One delay per poll iteration, and not one more.
        assert_eq!(
            sim.total_delay_us(),
            (timing::BUS_ACQUIRE_POLL_US * timing::BUS_ACQUIRE_POLL_LIMIT) as u64
        );
    }

    #[test]
    fn guard_drop_releases_on_early_exit() {
        let mut sim = SimBus::new();
        {
            let mut bus = Bus::acquire(&mut sim).unwrap();
            bus.set_mode(BusMode::WriteMem);
            // Guard goes out of scope without an explicit release.
        }
        assert!(!sim.bus_requested());
    }

    #[test]
    fn mem_write_then_read_back() {
        let mut sim = SimBus::new();
        let mut bus = Bus::acquire(&mut sim).unwrap();

        bus.set_mode(BusMode::WriteMem);
        bus.write_mem(crate::constants::addrspace::RAM_START + 0x10, 0x42);

        bus.set_mode(BusMode::ReadMem);
        assert_eq!(bus.read(crate::constants::addrspace::RAM_START + 0x10), 0x42);
    }

    #[test]
    fn ram_strobe_does_not_touch_flash_region() {
        let mut sim = SimBus::new();
        let mut bus = Bus::acquire(&mut sim).unwrap();
        bus.set_mode(BusMode::WriteMem);
        bus.write_mem(0x0010, 0x42);
        bus.release();

        // The flash chip ignores the ram strobe; erased state remains.
        assert_eq!(sim.mem(0x0010), 0xFF);
    }
}
