//! Host-to-device round trips: the real client, the real dispatcher, and
//! the simulated bus in between.

use std::io;

use bdbp::constants::addrspace;
use bdbp::device::Dispatcher;
use bdbp::device::sim::{SimBus, SimLink};
use bdbp::protocol::Status;
use bdbp::target::TargetError;
use bdbp::{Connection, Packet, Target};

/// Runs the device dispatcher in-process. Host frames go straight into the
/// dispatcher's link; reading a response byte turns the dispatcher's crank
/// until it has produced one.
struct InProcessDevice {
    dispatcher: Dispatcher<SimBus, SimLink>,
}

impl InProcessDevice {
    fn new(sim: SimBus) -> Self {
        InProcessDevice {
            dispatcher: Dispatcher::new(sim, SimLink::new()),
        }
    }

    fn port(&self) -> &SimBus {
        self.dispatcher.port()
    }
}

impl Connection for InProcessDevice {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.dispatcher.link_mut().feed(bytes);
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        loop {
            if let Some(byte) = self.dispatcher.link_mut().pop_output() {
                return Ok(byte);
            }
            self.dispatcher
                .poll_once()
                .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "device stopped"))?;
        }
    }
}

#[test]
fn ping_and_read() {
    let mut sim = SimBus::new();
    sim.load(0x0010, &[0x42, 0x43]);
    let mut target = Target::new(InProcessDevice::new(sim));

    target.ping().unwrap();

    let mut buffer = [0u8; 2];
    target.read_memory(0x0010, &mut buffer).unwrap();
    assert_eq!(buffer, [0x42, 0x43]);
}

#[test]
fn chunked_write_read_back() {
    let mut target = Target::new(InProcessDevice::new(SimBus::new()));
    let base = addrspace::RAM_START + 0x0800;

    // Large enough to need several packets in both directions.
    let data: Vec<u8> = (0..600u32).map(|i| (i * 7 % 256) as u8).collect();
    target.write_memory(base, &data).unwrap();

    let mut read_back = vec![0u8; data.len()];
    target.read_memory(base, &mut read_back).unwrap();
    assert_eq!(read_back, data);

    // The backing store saw every byte exactly where it belongs.
    let device = target.into_inner();
    assert_eq!(device.port().mem(base), data[0]);
    assert_eq!(device.port().mem(base + 599), data[599]);
}

#[test]
fn flash_programming_workflow() {
    let mut target = Target::new(InProcessDevice::new(SimBus::new()));

    let id = target.flash_software_id().unwrap();
    assert_eq!((id.manufacturer, id.device), (0xBF, 0xB7));

    let image: Vec<u8> = (0..300u32).map(|i| (i % 253) as u8).collect();
    target.write_flash(0x4000, &image).unwrap();
    target.write_flash(0x8000, &[0x5A]).unwrap();

    let mut read_back = vec![0u8; image.len()];
    target.read_memory(0x4000, &mut read_back).unwrap();
    assert_eq!(read_back, image);

    // Sector erase wipes the image but not the neighbouring sector.
    target.erase_sector(0x4000).unwrap();
    target.read_memory(0x4000, &mut read_back).unwrap();
    assert!(read_back.iter().all(|&b| b == 0xFF));
    let mut neighbour = [0u8; 1];
    target.read_memory(0x8000, &mut neighbour).unwrap();
    assert_eq!(neighbour, [0x5A]);

    target.erase_chip().unwrap();
    target.read_memory(0x8000, &mut neighbour).unwrap();
    assert_eq!(neighbour, [0xFF]);
}

#[test]
fn bus_timeout_reaches_the_host_as_a_device_error() {
    let mut target = Target::new(InProcessDevice::new(SimBus::never_acknowledge()));

    let err = target
        .write_memory(addrspace::RAM_START, &[1, 2, 3])
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<TargetError>(),
        Some(&TargetError::Device(Status::BusAcquireTimeout))
    );

    // A ping needs no bus and still works.
    target.ping().unwrap();
}

#[test]
fn unknown_command_keeps_the_stream_usable() {
    let mut target = Target::new(InProcessDevice::new(SimBus::new()));

    // A header from a future protocol revision, with payload.
    let request = Packet::decode(&[0xFF, 0x03, 0x01, 0x02, 0x03]).unwrap();
    let err = target.exec(&request).unwrap_err();
    assert_eq!(
        err.downcast_ref::<TargetError>(),
        Some(&TargetError::Device(Status::UnknownCommand))
    );

    // Frame alignment survived; the next command parses fine.
    target.ping().unwrap();
}
