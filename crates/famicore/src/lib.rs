//! Cycle-accurate NES execution engine.
//!
//! The core is the clock scheduler: CPU instructions and PPU dots are
//! interleaved at the region's exact ratio (3.0 PPU cycles per CPU cycle
//! NTSC, 3.2 PAL) with the APU clocked once per CPU cycle. Frames and
//! audio samples flow out through a single-consumer event bus; input,
//! pause, save-state and quit flow in the same way. Everything needed to
//! resume execution, down to the in-flight cycle quota, round-trips
//! through a versioned snapshot archive.
//!
//! Video and audio devices are not part of this crate: the runner
//! supplies them through the [`sink`] traits.

mod apu;
mod bus;
mod cartridge;
mod console;
mod controller;
mod cpu;
mod error;
mod events;
mod fps;
mod interrupt;
mod mappers;
mod memmap;
mod nes;
pub mod ppu;
mod scheduler;
pub mod sink;
mod snapshot;
mod timing;

pub use apu::ApuState;
pub use bus::{Bus, SimpleBus};
pub use cartridge::{Mapper, MapperState, Mirroring, RomImage};
pub use console::Console;
pub use controller::ControllerState;
pub use cpu::CpuState;
pub use controller::{Button, InputLatches, Port};
pub use error::{BusError, CpuError, EngineError, RomError, SnapshotError};
pub use events::{Event, EventSender, PauseCommand, PauseRequest};
pub use memmap::AddressSpace;
pub use nes::{Nes, Options};
pub use ppu::{FB_HEIGHT, FB_WIDTH, FrameBuffer, PpuState};
pub use scheduler::{RunState, Shutdown, StepMode, apply_pause};
pub use snapshot::{Snapshot, VERSION as SNAPSHOT_VERSION};
pub use timing::{ClockRatio, Region};
