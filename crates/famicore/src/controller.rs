//! Controller ports.
//!
//! Two standard joypads behind the $4016/$4017 serial shift registers.
//! Button state lives in shared atomic latches written by the event
//! consumer; the shift registers and strobe are CPU-side state read and
//! clocked by the bus on the scheduler thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Controller port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    One,
    Two,
}

impl Port {
    const fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

/// A joypad button, in shift-out order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    /// Bit position in the latch byte.
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::Select => 2,
            Self::Start => 3,
            Self::Up => 4,
            Self::Down => 5,
            Self::Left => 6,
            Self::Right => 7,
        }
    }
}

/// Shared button latches, one byte per port.
///
/// Writes are atomic at byte granularity, so the CPU always observes a
/// coherent latch even while the event consumer is updating it.
#[derive(Debug, Default)]
pub struct InputLatches {
    ports: [AtomicU8; 2],
}

impl InputLatches {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set one button on one port.
    pub fn set_button(&self, port: Port, button: Button, pressed: bool) {
        let mask = 1u8 << button.bit();
        let latch = &self.ports[port.index()];
        if pressed {
            latch.fetch_or(mask, Ordering::Relaxed);
        } else {
            latch.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    /// Current latch byte for a port.
    #[must_use]
    pub fn get(&self, port: Port) -> u8 {
        self.ports[port.index()].load(Ordering::Relaxed)
    }

    fn set(&self, port: Port, value: u8) {
        self.ports[port.index()].store(value, Ordering::Relaxed);
    }
}

/// Serialized controller state for snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub latches: [u8; 2],
    pub shift: [u8; 2],
    pub strobe: bool,
}

/// The $4016/$4017 bus device.
pub struct Controllers {
    latches: Arc<InputLatches>,
    shift: [u8; 2],
    strobe: bool,
}

impl Controllers {
    #[must_use]
    pub fn new(latches: Arc<InputLatches>) -> Self {
        Self {
            latches,
            shift: [0; 2],
            strobe: false,
        }
    }

    /// Read one bit from a port's shift register.
    ///
    /// While strobed, reads return the live A button. Otherwise each read
    /// shifts one bit out; after all eight, reads return 1.
    pub fn read(&mut self, port: Port) -> u8 {
        if self.strobe {
            return self.latches.get(port) & 1;
        }
        let i = port.index();
        let bit = self.shift[i] & 1;
        self.shift[i] = (self.shift[i] >> 1) | 0x80;
        bit
    }

    /// Write $4016: bit 0 is the strobe. The falling edge latches the
    /// shared button state into both shift registers.
    pub fn write_strobe(&mut self, value: u8) {
        let new_strobe = value & 1 != 0;
        if self.strobe && !new_strobe {
            self.shift[0] = self.latches.get(Port::One);
            self.shift[1] = self.latches.get(Port::Two);
        }
        self.strobe = new_strobe;
    }

    /// Clear shift registers and strobe (console reset).
    pub fn reset(&mut self) {
        self.shift = [0; 2];
        self.strobe = false;
        self.latches.set(Port::One, 0);
        self.latches.set(Port::Two, 0);
    }

    #[must_use]
    pub fn snapshot(&self) -> ControllerState {
        ControllerState {
            latches: [self.latches.get(Port::One), self.latches.get(Port::Two)],
            shift: self.shift,
            strobe: self.strobe,
        }
    }

    pub fn restore(&mut self, state: &ControllerState) {
        self.latches.set(Port::One, state.latches[0]);
        self.latches.set(Port::Two, state.latches[1]);
        self.shift = state.shift;
        self.strobe = state.strobe;
    }
}
