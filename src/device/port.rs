//! Capability interface over the pin-level bus hardware.

/// Direction of a bidirectional pin group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDir {
    Input,
    Output,
}

/// Pin-level access to the shared target bus.
///
/// The firmware implements this over the microcontroller's GPIO registers;
/// [`crate::device::sim::SimBus`] implements it over an in-memory model.
/// Strobe levels are logical: `true` asserts the signal regardless of the
/// electrical polarity a particular board revision uses. Pin writes cannot
/// fail, so nothing here returns a `Result`.
pub trait BusPort {
    fn set_addr_dir(&mut self, dir: PinDir);
    fn set_data_dir(&mut self, dir: PinDir);

    /// Drive the address pins. Only the low 18 bits exist on the bus.
    fn write_addr(&mut self, address: u32);
    /// Drive the data pins. Requires the data bus in output direction.
    fn write_data(&mut self, value: u8);
    /// Sample the data pins. Requires the data bus in input direction.
    fn read_data(&mut self) -> u8;

    /// Drive the ram chip's write-enable strobe.
    fn set_ram_write_enable(&mut self, asserted: bool);
    /// Drive the flash chip's write-enable strobe.
    fn set_flash_write_enable(&mut self, asserted: bool);
    /// Drive the memory output-enable line shared by ram and flash.
    fn set_mem_output_enable(&mut self, asserted: bool);

    /// Drive the bus-request line towards the target CPU.
    fn set_bus_request(&mut self, asserted: bool);
    /// Sample the bus-acknowledge line; `true` means the target CPU has
    /// released the bus.
    fn bus_acknowledged(&mut self) -> bool;

    /// Busy-wait. Flash settle times and pin propagation delays go through
    /// here so the simulator can record instead of sleep.
    fn delay_us(&mut self, us: u32);
}
