//! Interrupt lines.
//!
//! Standalone signal objects shared between one producer and the CPU:
//! the PPU raises NMI, the mapper and the APU frame counter each drive
//! their own IRQ line. Producers write, the CPU reads; nobody owns
//! anybody, which keeps the CPU/PPU/mapper wiring acyclic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single interrupt signal.
///
/// NMI consumers use [`take`](Self::take) (edge-triggered: observing the
/// signal consumes it). IRQ consumers use [`is_raised`](Self::is_raised)
/// (level-triggered: the line stays asserted until the producer clears it).
#[derive(Debug, Default)]
pub struct InterruptLine {
    raised: AtomicBool,
}

impl InterruptLine {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Assert the line.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    /// Deassert the line.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Relaxed);
    }

    /// Level read: is the line currently asserted?
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    /// Edge read: returns true once per assertion, clearing the line.
    #[must_use]
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::Relaxed)
    }

    /// Force the line to a known state (snapshot restore).
    pub fn set(&self, raised: bool) {
        self.raised.store(raised, Ordering::Relaxed);
    }
}
