//! NROM (mapper 0): no bank switching.
//!
//! - PRG: 16K mirrored across $8000-$FFFF, or 32K flat
//! - PRG RAM: 8K at $6000-$7FFF
//! - CHR: 8K at PPU $0000-$1FFF, RAM when the image carries no CHR

use crate::cartridge::{Mapper, MapperState, Mirroring};
use crate::error::SnapshotError;

pub struct Nrom {
    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    mirroring: Mirroring,
}

impl Nrom {
    #[must_use]
    pub fn new(prg_rom: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        let chr_is_ram = chr.is_empty();
        let chr = if chr_is_ram { vec![0u8; 8192] } else { chr };
        Self {
            prg_rom,
            prg_ram: vec![0u8; 8192],
            chr,
            chr_is_ram,
            mirroring,
        }
    }
}

impl Mapper for Nrom {
    fn id(&self) -> u8 {
        0
    }

    fn cpu_ranges(&self) -> &'static [(u16, u16)] {
        &[(0x6000, 0x7FFF), (0x8000, 0xFFFF)]
    }

    fn cpu_read(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr - 0x6000) as usize],
            _ => {
                let offset = (addr - 0x8000) as usize;
                self.prg_rom[offset % self.prg_rom.len()]
            }
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if let 0x6000..=0x7FFF = addr {
            self.prg_ram[(addr - 0x6000) as usize] = value;
        }
        // PRG ROM writes are ignored.
    }

    fn chr_read(&self, addr: u16) -> u8 {
        self.chr[(addr as usize) & 0x1FFF]
    }

    fn chr_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            self.chr[(addr as usize) & 0x1FFF] = value;
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn load_prg_ram(&mut self, data: &[u8]) {
        let n = data.len().min(self.prg_ram.len());
        self.prg_ram[..n].copy_from_slice(&data[..n]);
    }

    fn snapshot(&self) -> MapperState {
        MapperState {
            id: self.id(),
            regs: Vec::new(),
            prg_ram: self.prg_ram.clone(),
            chr_ram: if self.chr_is_ram {
                self.chr.clone()
            } else {
                Vec::new()
            },
        }
    }

    fn restore(&mut self, state: &MapperState) -> Result<(), SnapshotError> {
        if state.id != self.id() {
            return Err(SnapshotError::MapperMismatch {
                expected: self.id(),
                found: state.id,
            });
        }
        self.load_prg_ram(&state.prg_ram);
        if self.chr_is_ram && state.chr_ram.len() == self.chr.len() {
            self.chr.copy_from_slice(&state.chr_ram);
        }
        Ok(())
    }
}
