//! Software-simulated bus hardware.
//!
//! [`SimBus`] stands in for the real board: a byte array per memory chip, a
//! flash model that decodes the unlock/command sequences, and a bus
//! handshake with scriptable acknowledge behavior. [`SimLink`] is the
//! matching scripted serial link. Together they let the whole device side
//! run in tests, with delays recorded instead of slept.

use std::collections::VecDeque;

use crate::constants::addrspace;
use crate::constants::flash::{
    CMD_BYTE_PROGRAM, CMD_ENTER_SOFTWARE_ID, CMD_ERASE_CHIP, CMD_ERASE_SECTOR, CMD_ERASE_SETUP,
    CMD_EXIT_SOFTWARE_ID, SECTOR_SIZE, SOFTWARE_ID_DEV_ADDR, SOFTWARE_ID_MFG_ADDR, UNLOCK_ADDR1,
    UNLOCK_ADDR2, UNLOCK_BYTE1, UNLOCK_BYTE2,
};
use crate::device::port::{BusPort, PinDir};
use crate::device::serial::Link;

/// SST39SF040 identifiers, the chip on the reference board.
const DEFAULT_MFG_ID: u8 = 0xBF;
const DEFAULT_DEV_ID: u8 = 0xB7;

/// Progress through the flash chip's command sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashSeq {
    Idle,
    Unlock1,
    Unlock2,
    Program,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
}

/// Simulated bus port backed by in-memory flash and ram arrays.
#[derive(Debug)]
pub struct SimBus {
    flash: Vec<u8>,
    ram: Vec<u8>,

    addr: u32,
    data_out: u8,
    addr_dir: PinDir,
    data_dir: PinDir,
    ram_we: bool,
    flash_we: bool,
    mem_oe: bool,

    bus_request: bool,
    /// `None` simulates a target CPU that never lets go of the bus.
    ack_after_polls: Option<u32>,
    polls_while_requested: u32,

    seq: FlashSeq,
    id_mode: bool,
    software_id: (u8, u8),

    delay_us_total: u64,
}

impl SimBus {
    /// Erased flash, zeroed ram, bus granted on the first poll.
    pub fn new() -> Self {
        Self::with_ack(Some(0))
    }

    /// The target CPU ignores bus requests; every acquisition times out.
    pub fn never_acknowledge() -> Self {
        Self::with_ack(None)
    }

    /// The target CPU grants the bus after `polls` acknowledge polls.
    pub fn acknowledge_after(polls: u32) -> Self {
        Self::with_ack(Some(polls))
    }

    fn with_ack(ack_after_polls: Option<u32>) -> Self {
        SimBus {
            flash: vec![0xFF; addrspace::FLASH_SIZE as usize],
            ram: vec![0x00; addrspace::RAM_SIZE as usize],
            addr: 0,
            data_out: 0,
            addr_dir: PinDir::Input,
            data_dir: PinDir::Input,
            ram_we: false,
            flash_we: false,
            mem_oe: false,
            bus_request: false,
            ack_after_polls,
            polls_while_requested: 0,
            seq: FlashSeq::Idle,
            id_mode: false,
            software_id: (DEFAULT_MFG_ID, DEFAULT_DEV_ID),
            delay_us_total: 0,
        }
    }

    /// Put bytes straight into the backing store, bypassing the bus.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        assert!(
            address as u64 + bytes.len() as u64 <= addrspace::SIZE as u64,
            "load outside the address space"
        );
        for (i, &value) in bytes.iter().enumerate() {
            let address = address + i as u32;
            if addrspace::is_ram_addr(address) {
                self.ram[(address - addrspace::RAM_START) as usize] = value;
            } else {
                self.flash[address as usize] = value;
            }
        }
    }

    /// Read the backing store directly, bypassing the bus.
    pub fn mem(&self, address: u32) -> u8 {
        if addrspace::is_ram_addr(address) {
            self.ram[(address - addrspace::RAM_START) as usize]
        } else {
            self.flash[address as usize]
        }
    }

    pub fn bus_requested(&self) -> bool {
        self.bus_request
    }

    pub fn addr_dir(&self) -> PinDir {
        self.addr_dir
    }

    pub fn ram_write_enabled(&self) -> bool {
        self.ram_we
    }

    pub fn flash_write_enabled(&self) -> bool {
        self.flash_we
    }

    /// Sum of all busy-waits the device asked for, in microseconds.
    pub fn total_delay_us(&self) -> u64 {
        self.delay_us_total
    }

    /// One write strobe as seen by the flash chip.
    fn flash_cycle(&mut self, addr: u32, value: u8) {
        use FlashSeq::*;
        self.seq = match self.seq {
            Idle => match (addr, value) {
                (UNLOCK_ADDR1, UNLOCK_BYTE1) => Unlock1,
                _ => Idle,
            },
            Unlock1 => match (addr, value) {
                (UNLOCK_ADDR2, UNLOCK_BYTE2) => Unlock2,
                _ => Idle,
            },
            Unlock2 => match (addr, value) {
                (UNLOCK_ADDR1, CMD_BYTE_PROGRAM) => Program,
                (UNLOCK_ADDR1, CMD_ERASE_SETUP) => EraseSetup,
                (UNLOCK_ADDR1, CMD_ENTER_SOFTWARE_ID) => {
                    self.id_mode = true;
                    Idle
                }
                (UNLOCK_ADDR1, CMD_EXIT_SOFTWARE_ID) => {
                    self.id_mode = false;
                    Idle
                }
                _ => Idle,
            },
            Program => {
                // Programming clears bits, it cannot set them.
                self.flash[addr as usize] &= value;
                Idle
            }
            EraseSetup => match (addr, value) {
                (UNLOCK_ADDR1, UNLOCK_BYTE1) => EraseUnlock1,
                _ => Idle,
            },
            EraseUnlock1 => match (addr, value) {
                (UNLOCK_ADDR2, UNLOCK_BYTE2) => EraseUnlock2,
                _ => Idle,
            },
            EraseUnlock2 => match (addr, value) {
                (UNLOCK_ADDR1, CMD_ERASE_CHIP) => {
                    self.flash.fill(0xFF);
                    Idle
                }
                (_, CMD_ERASE_SECTOR) => {
                    let base = (addr & !(SECTOR_SIZE - 1)) as usize;
                    self.flash[base..base + SECTOR_SIZE as usize].fill(0xFF);
                    Idle
                }
                _ => Idle,
            },
        };
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPort for SimBus {
    fn set_addr_dir(&mut self, dir: PinDir) {
        self.addr_dir = dir;
    }

    fn set_data_dir(&mut self, dir: PinDir) {
        self.data_dir = dir;
    }

    fn write_addr(&mut self, address: u32) {
        self.addr = address & (addrspace::SIZE - 1);
    }

    fn write_data(&mut self, value: u8) {
        self.data_out = value;
    }

    fn read_data(&mut self) -> u8 {
        if self.data_dir == PinDir::Output {
            return self.data_out;
        }
        if !self.mem_oe {
            // Nothing drives the bus; reads float high.
            return 0xFF;
        }
        if addrspace::is_ram_addr(self.addr) {
            self.ram[(self.addr - addrspace::RAM_START) as usize]
        } else if self.id_mode {
            match self.addr {
                SOFTWARE_ID_MFG_ADDR => self.software_id.0,
                SOFTWARE_ID_DEV_ADDR => self.software_id.1,
                _ => self.flash[self.addr as usize],
            }
        } else {
            self.flash[self.addr as usize]
        }
    }

    fn set_ram_write_enable(&mut self, asserted: bool) {
        // The ram chip latches on the strobe's asserting edge, and only when
        // it is selected by the high address bit.
        if asserted
            && !self.ram_we
            && self.data_dir == PinDir::Output
            && addrspace::is_ram_addr(self.addr)
        {
            self.ram[(self.addr - addrspace::RAM_START) as usize] = self.data_out;
        }
        self.ram_we = asserted;
    }

    fn set_flash_write_enable(&mut self, asserted: bool) {
        if asserted
            && !self.flash_we
            && self.data_dir == PinDir::Output
            && addrspace::is_flash_addr(self.addr)
        {
            let (addr, value) = (self.addr, self.data_out);
            self.flash_cycle(addr, value);
        }
        self.flash_we = asserted;
    }

    fn set_mem_output_enable(&mut self, asserted: bool) {
        self.mem_oe = asserted;
    }

    fn set_bus_request(&mut self, asserted: bool) {
        self.bus_request = asserted;
        if !asserted {
            self.polls_while_requested = 0;
        }
    }

    fn bus_acknowledged(&mut self) -> bool {
        if !self.bus_request {
            return false;
        }
        match self.ack_after_polls {
            Some(after) if self.polls_while_requested >= after => true,
            Some(_) => {
                self.polls_while_requested += 1;
                false
            }
            None => false,
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_us_total += us as u64;
    }
}

/// Error for a scripted link that ran out of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("link closed")]
pub struct LinkClosed;

/// Scripted serial link: feed request bytes in, collect response bytes out.
pub struct SimLink {
    rx: VecDeque<u8>,
    tx: VecDeque<u8>,
}

impl SimLink {
    pub fn new() -> Self {
        SimLink {
            rx: VecDeque::new(),
            tx: VecDeque::new(),
        }
    }

    /// Queue bytes for the device to read.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Pop one byte the device has written, if any.
    pub fn pop_output(&mut self) -> Option<u8> {
        self.tx.pop_front()
    }

    /// Drain everything the device has written so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.tx.drain(..).collect()
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for SimLink {
    type Error = LinkClosed;

    fn read_byte(&mut self) -> Result<u8, LinkClosed> {
        self.rx.pop_front().ok_or(LinkClosed)
    }

    fn write_byte(&mut self, value: u8) -> Result<(), LinkClosed> {
        self.tx.push_back(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_ignores_writes_without_unlock() {
        let mut sim = SimBus::new();
        sim.set_data_dir(PinDir::Output);
        sim.write_addr(0x0100);
        sim.write_data(0x00);
        sim.set_flash_write_enable(true);
        sim.set_flash_write_enable(false);
        assert_eq!(sim.mem(0x0100), 0xFF);
    }

    #[test]
    fn broken_unlock_sequence_resets_the_chip_state() {
        let mut sim = SimBus::new();
        sim.set_data_dir(PinDir::Output);
        for (addr, value) in [
            (UNLOCK_ADDR1, UNLOCK_BYTE1),
            (UNLOCK_ADDR2, UNLOCK_BYTE2),
            // Wrong third cycle: address off by one.
            (UNLOCK_ADDR1 + 1, CMD_BYTE_PROGRAM),
            (0x0100, 0x00),
        ] {
            sim.write_addr(addr);
            sim.write_data(value);
            sim.set_flash_write_enable(true);
            sim.set_flash_write_enable(false);
        }
        assert_eq!(sim.mem(0x0100), 0xFF);
    }

    #[test]
    fn acknowledge_arrives_after_the_configured_polls() {
        let mut sim = SimBus::acknowledge_after(3);
        assert!(!sim.bus_acknowledged(), "nothing granted before a request");
        sim.set_bus_request(true);
        assert!(!sim.bus_acknowledged());
        assert!(!sim.bus_acknowledged());
        assert!(!sim.bus_acknowledged());
        assert!(sim.bus_acknowledged());
        sim.set_bus_request(false);
        assert!(!sim.bus_acknowledged());
    }
}
