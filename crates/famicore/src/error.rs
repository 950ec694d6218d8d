//! Error types for the engine.
//!
//! Three families with different propagation policies: construction errors
//! are returned to the caller, CPU execution errors are fatal and bubble
//! out of the scheduler, snapshot errors are logged and swallowed at the
//! event-handler boundary.

use thiserror::Error;

use crate::memmap::AddressSpace;

/// Fatal CPU execution error. The scheduler surfaces these and quits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("unsupported opcode ${opcode:02X} at ${pc:04X}")]
    UnsupportedOpcode { opcode: u8, pc: u16 },

    #[error("bus fault at ${addr:04X}")]
    BusFault { addr: u16 },
}

/// Bus wiring error. Only possible at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("{space:?} address range ${start:04X}-${end:04X} is already mapped")]
    Overlap {
        space: AddressSpace,
        start: u16,
        end: u16,
    },
}

/// Cartridge loading error.
#[derive(Debug, Error)]
pub enum RomError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not an iNES file (bad magic)")]
    BadMagic,

    #[error("iNES file truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unsupported mapper {0}")]
    UnsupportedMapper(u8),
}

/// Save-state error. Non-fatal: reported and the engine keeps its state.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid save state format version '{found}'")]
    VersionMismatch { found: String },

    #[error("invalid save state file")]
    MissingState,

    #[error("save state is for mapper {found}, cartridge uses mapper {expected}")]
    MapperMismatch { expected: u8, found: u8 },
}

/// Top-level engine error: construction failures and fatal execution errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("error loading ROM: {0}")]
    Rom(#[from] RomError),

    #[error("bus wiring failed: {0}")]
    Bus(#[from] BusError),

    #[error("emulation halted: {0}")]
    Cpu(#[from] CpuError),
}
