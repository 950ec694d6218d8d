//! Mapper implementations.

mod cnrom;
mod mmc3;
mod nrom;

use std::sync::Arc;

pub use cnrom::Cnrom;
pub use mmc3::Mmc3;
pub use nrom::Nrom;

use crate::cartridge::{Mapper, RomImage};
use crate::error::RomError;
use crate::interrupt::InterruptLine;

/// Build the mapper for a parsed image.
///
/// # Errors
///
/// Returns [`RomError::UnsupportedMapper`] for unimplemented mappers.
pub fn build(rom: &RomImage, irq: Arc<InterruptLine>) -> Result<Box<dyn Mapper>, RomError> {
    match rom.mapper_id {
        0 => Ok(Box::new(Nrom::new(
            rom.prg.clone(),
            rom.chr.clone(),
            rom.mirroring,
        ))),
        3 => Ok(Box::new(Cnrom::new(
            rom.prg.clone(),
            rom.chr.clone(),
            rom.mirroring,
        ))),
        4 => Ok(Box::new(Mmc3::new(
            rom.prg.clone(),
            rom.chr.clone(),
            rom.mirroring,
            irq,
        ))),
        n => Err(RomError::UnsupportedMapper(n)),
    }
}
