//! Serial receive plumbing between the interrupt handler and the main loop.
//!
//! Incoming bytes arrive in interrupt context and are handed to the main
//! loop through a fixed-size single-producer single-consumer ring. The
//! interrupt side only pushes, the main loop only pops; when the ring is
//! full, incoming bytes are dropped and counted rather than overwriting
//! unread data.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Byte link the dispatcher runs over.
///
/// `read_byte` blocks until a byte is available; on the real device that
/// means sleeping until the receive interrupt fires. The error type exists
/// for test links that can run dry; firmware links are infallible.
pub trait Link {
    type Error;

    fn read_byte(&mut self) -> Result<u8, Self::Error>;
    fn write_byte(&mut self, value: u8) -> Result<(), Self::Error>;
}

/// Fixed-size receive ring shared between the receive interrupt and the
/// main loop. `N` must be a power of two; indices grow monotonically and are
/// masked on access, so the full/empty distinction needs no spare slot.
pub struct RxRing<const N: usize> {
    data: [AtomicU8; N],
    read: AtomicUsize,
    write: AtomicUsize,
    dropped: AtomicUsize,
}

impl<const N: usize> RxRing<N> {
    const POWER_OF_TWO: () = assert!(N.is_power_of_two(), "ring size must be a power of two");

    pub const fn new() -> Self {
        let () = Self::POWER_OF_TWO;
        RxRing {
            data: [const { AtomicU8::new(0) }; N],
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Split into the interrupt-side producer and the main-loop consumer.
    /// Taking `&mut self` guarantees there is one of each.
    pub fn split(&mut self) -> (RxProducer<'_, N>, RxConsumer<'_, N>) {
        (RxProducer { ring: &*self }, RxConsumer { ring: &*self })
    }
}

impl<const N: usize> Default for RxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-side handle: push only.
pub struct RxProducer<'a, const N: usize> {
    ring: &'a RxRing<N>,
}

impl<const N: usize> RxProducer<'_, N> {
    /// Append one byte. Returns `false` and drops the byte when the ring is
    /// full; the drop is counted so the main loop can report the overrun.
    pub fn push(&self, value: u8) -> bool {
        let write = self.ring.write.load(Ordering::Relaxed);
        let read = self.ring.read.load(Ordering::Acquire);
        if write.wrapping_sub(read) == N {
            self.ring.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.ring.data[write & (N - 1)].store(value, Ordering::Relaxed);
        self.ring.write.store(write.wrapping_add(1), Ordering::Release);
        true
    }
}

/// Main-loop handle: pop only.
pub struct RxConsumer<'a, const N: usize> {
    ring: &'a RxRing<N>,
}

impl<const N: usize> RxConsumer<'_, N> {
    pub fn pop(&mut self) -> Option<u8> {
        let read = self.ring.read.load(Ordering::Relaxed);
        let write = self.ring.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let value = self.ring.data[read & (N - 1)].load(Ordering::Relaxed);
        self.ring.read.store(read.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    pub fn len(&self) -> usize {
        let read = self.ring.read.load(Ordering::Relaxed);
        let write = self.ring.write.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes dropped on the producer side so far.
    pub fn dropped(&self) -> usize {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

/// [`Link`] over a receive ring and a transmit sink, the shape the firmware
/// interrupt plumbing produces. Reading spins on the consumer until the
/// interrupt delivers data.
pub struct RingLink<'a, const N: usize, T> {
    rx: RxConsumer<'a, N>,
    tx: T,
    reported_drops: usize,
}

impl<'a, const N: usize, T: FnMut(u8)> RingLink<'a, N, T> {
    pub fn new(rx: RxConsumer<'a, N>, tx: T) -> Self {
        RingLink {
            rx,
            tx,
            reported_drops: 0,
        }
    }
}

impl<const N: usize, T: FnMut(u8)> Link for RingLink<'_, N, T> {
    type Error = Infallible;

    fn read_byte(&mut self) -> Result<u8, Infallible> {
        loop {
            let dropped = self.rx.dropped();
            if dropped != self.reported_drops {
                log::warn!(
                    "serial receive overrun: {} bytes dropped",
                    dropped - self.reported_drops
                );
                self.reported_drops = dropped;
            }
            if let Some(value) = self.rx.pop() {
                return Ok(value);
            }
            std::hint::spin_loop();
        }
    }

    fn write_byte(&mut self, value: u8) -> Result<(), Infallible> {
        (self.tx)(value);
        Ok(())
    }
}
