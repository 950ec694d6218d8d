//! Save states.
//!
//! A save state is a JSON archive with two entries: `meta` carries the
//! format version token, `state` the complete machine snapshot. Loading
//! is all-or-nothing: the archive is fully decoded and version-checked
//! before any engine state is touched, and a mismatched version or a
//! missing `state` entry rejects the file outright.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::apu::ApuState;
use crate::cartridge::MapperState;
use crate::controller::ControllerState;
use crate::cpu::CpuState;
use crate::error::SnapshotError;
use crate::ppu::PpuState;
use crate::scheduler::StepMode;

/// Save-state format version token. Bumped on incompatible layout
/// changes; load requires an exact match.
pub const VERSION: &str = "0.2";

/// Everything needed to resume execution exactly where it stopped.
///
/// Includes the scheduler's in-flight cycle quota and step mode; without
/// them, a state saved at a sub-frame boundary would resume with skewed
/// CPU/PPU phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu: CpuState,
    pub ram: Vec<u8>,
    pub open_bus: u8,
    pub total_cycles: u64,
    pub oam_dma: Option<u8>,
    pub apu: ApuState,
    pub ppu: PpuState,
    pub mapper: MapperState,
    pub controllers: ControllerState,
    pub ppu_quota: u64,
    pub step_mode: StepMode,
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Archive {
    meta: Meta,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<Snapshot>,
}

/// Write a snapshot archive to `path`.
///
/// # Errors
///
/// Returns [`SnapshotError`] on I/O or encoding failure.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let archive = Archive {
        meta: Meta {
            version: VERSION.to_string(),
        },
        state: Some(snapshot.clone()),
    };
    let mut file = fs::File::create(path)?;
    serde_json::to_writer(&mut file, &archive)?;
    file.flush()?;
    Ok(())
}

/// Read and validate a snapshot archive from `path`.
///
/// # Errors
///
/// Returns [`SnapshotError::VersionMismatch`] for a foreign version
/// token and [`SnapshotError::MissingState`] when the archive has no
/// `state` entry.
pub fn load(path: &Path) -> Result<Snapshot, SnapshotError> {
    let data = fs::read(path)?;
    let archive: Archive = serde_json::from_slice(&data)?;
    if archive.meta.version != VERSION {
        return Err(SnapshotError::VersionMismatch {
            found: archive.meta.version,
        });
    }
    archive.state.ok_or(SnapshotError::MissingState)
}
