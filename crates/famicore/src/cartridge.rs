//! Cartridges: iNES parsing, the mapper trait, battery RAM.
//!
//! The mapper is the cartridge-side bus participant. It declares the
//! address ranges it claims in both spaces, answers reads and writes,
//! reports nametable mirroring, and may expose a scanline counter (MMC3).
//! Whether a mapper has a scanline counter is a capability queried once at
//! wiring time; the scheduler never type-tests in the hot loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RomError, SnapshotError};
use crate::interrupt::InterruptLine;
use crate::mappers;
use crate::timing::Region;

/// Nametable mirroring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    FourScreen,
}

/// Serialized mapper state for snapshots.
///
/// `regs` is a mapper-private register encoding; each mapper packs and
/// unpacks its own layout. RAM-backed memories travel alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperState {
    pub id: u8,
    pub regs: Vec<u8>,
    pub prg_ram: Vec<u8>,
    pub chr_ram: Vec<u8>,
}

/// Cartridge-side bus participant.
pub trait Mapper: Send {
    /// iNES mapper number.
    fn id(&self) -> u8;

    /// CPU-space ranges this mapper claims.
    fn cpu_ranges(&self) -> &'static [(u16, u16)];

    /// PPU-space ranges this mapper claims.
    fn chr_ranges(&self) -> &'static [(u16, u16)] {
        &[(0x0000, 0x1FFF)]
    }

    fn cpu_read(&self, addr: u16) -> u8;
    fn cpu_write(&mut self, addr: u16, value: u8);
    fn chr_read(&self, addr: u16) -> u8;
    fn chr_write(&mut self, addr: u16, value: u8);

    /// Current nametable mirroring (may change at runtime on MMC3).
    fn mirroring(&self) -> Mirroring;

    /// Capability query: does this mapper count scanlines?
    fn has_scanline_counter(&self) -> bool {
        false
    }

    /// Clock the scanline counter once. Called by the scheduler on the
    /// PPU's per-scanline edge, only when the capability is present.
    fn scanline_tick(&mut self) {}

    /// Battery-backed PRG RAM contents, when the board has any.
    fn prg_ram(&self) -> Option<&[u8]> {
        None
    }

    /// Restore PRG RAM contents (battery load).
    fn load_prg_ram(&mut self, _data: &[u8]) {}

    fn reset(&mut self) {}

    fn snapshot(&self) -> MapperState;

    /// Restore mapper-private state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::MapperMismatch`] when the state belongs to
    /// a different mapper.
    fn restore(&mut self, state: &MapperState) -> Result<(), SnapshotError>;
}

/// A parsed iNES image plus the metadata the engine needs from it.
#[derive(Debug)]
pub struct RomImage {
    pub prg: Vec<u8>,
    pub chr: Vec<u8>,
    pub mapper_id: u8,
    pub mirroring: Mirroring,
    pub battery: bool,
    pub region: Region,
    pub game_name: String,
    sav_path: Option<PathBuf>,
}

impl RomImage {
    /// Parse an iNES file from disk. The game name comes from the file
    /// stem and battery saves will live beside the ROM.
    ///
    /// # Errors
    ///
    /// Returns [`RomError`] on I/O failure or a malformed image.
    pub fn from_file(path: &Path) -> Result<Self, RomError> {
        let data = std::fs::read(path)?;
        let name = path
            .file_stem()
            .map_or_else(|| "rom".to_string(), |s| s.to_string_lossy().into_owned());
        let mut image = Self::from_bytes(&name, &data)?;
        image.sav_path = Some(path.with_extension("sav"));
        Ok(image)
    }

    /// Parse an in-memory iNES image.
    ///
    /// # Errors
    ///
    /// Returns [`RomError`] if the header or payload is malformed.
    pub fn from_bytes(name: &str, data: &[u8]) -> Result<Self, RomError> {
        if data.len() < 16 {
            return Err(RomError::Truncated {
                expected: 16,
                actual: data.len(),
            });
        }
        if &data[0..4] != b"NES\x1a" {
            return Err(RomError::BadMagic);
        }

        let prg_banks = data[4] as usize;
        let chr_banks = data[5] as usize;
        let flags6 = data[6];
        let flags7 = data[7];

        let mapper_id = (flags7 & 0xF0) | (flags6 >> 4);
        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let battery = flags6 & 0x02 != 0;
        let has_trainer = flags6 & 0x04 != 0;

        let prg_size = prg_banks * 16384;
        let chr_size = chr_banks * 8192;
        let prg_start = if has_trainer { 16 + 512 } else { 16 };
        let expected = prg_start + prg_size + chr_size;
        if data.len() < expected {
            return Err(RomError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let prg = data[prg_start..prg_start + prg_size].to_vec();
        let chr = data[prg_start + prg_size..expected].to_vec();

        Ok(Self {
            prg,
            chr,
            mapper_id,
            mirroring,
            battery,
            region: detect_region(name, data),
            game_name: name.to_string(),
            sav_path: None,
        })
    }
}

/// Region detection: NES 2.0 region bits when present, otherwise common
/// PAL markers in the file name, defaulting to NTSC.
fn detect_region(name: &str, data: &[u8]) -> Region {
    if data.len() >= 16 && data[7] & 0x0C == 0x08 && data[12] & 0x03 == 1 {
        return Region::Pal;
    }
    let pal_marker = ["(E)", "(PAL)", "(Europe)"]
        .iter()
        .any(|m| name.contains(m));
    if pal_marker { Region::Pal } else { Region::Ntsc }
}

/// A wired cartridge: the mapper plus battery bookkeeping.
pub struct Cartridge {
    pub(crate) mapper: Box<dyn Mapper>,
    battery: bool,
    sav_path: Option<PathBuf>,
}

impl std::fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartridge")
            .field("mapper_id", &self.mapper.id())
            .field("battery", &self.battery)
            .field("sav_path", &self.sav_path)
            .finish()
    }
}

impl Cartridge {
    /// Build the mapper for an image and wire it to the CPU IRQ line.
    ///
    /// # Errors
    ///
    /// Returns [`RomError::UnsupportedMapper`] for mapper numbers the
    /// engine does not implement.
    pub fn new(rom: RomImage, irq: Arc<InterruptLine>) -> Result<Self, RomError> {
        let mapper = mappers::build(&rom, irq)?;
        Ok(Self {
            mapper,
            battery: rom.battery,
            sav_path: rom.sav_path,
        })
    }

    /// Load battery-backed save RAM from `<game>.sav`, if this board has a
    /// battery and a save file exists. Failures are logged, not fatal.
    pub fn load_battery(&mut self) {
        let Some(path) = battery_path(self.battery, &self.sav_path) else {
            return;
        };
        match std::fs::read(&path) {
            Ok(data) => {
                self.mapper.load_prg_ram(&data);
                info!("loaded battery RAM from {}", path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not load battery RAM: {e}"),
        }
    }

    /// Write battery-backed save RAM to `<game>.sav`.
    pub fn save_battery(&self) {
        let Some(path) = battery_path(self.battery, &self.sav_path) else {
            return;
        };
        let Some(ram) = self.mapper.prg_ram() else {
            return;
        };
        match std::fs::write(&path, ram) {
            Ok(()) => info!("saved battery RAM to {}", path.display()),
            Err(e) => warn!("could not save battery RAM: {e}"),
        }
    }
}

fn battery_path(battery: bool, sav_path: &Option<PathBuf>) -> Option<PathBuf> {
    if !battery {
        return None;
    }
    sav_path.clone()
}
