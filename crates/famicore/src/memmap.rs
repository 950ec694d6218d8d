//! Address-space mapping tables.
//!
//! Each address space (CPU and PPU) has a byte-granular table from address
//! to the device that claims it. Devices declare their ranges at wiring
//! time; overlapping claims are a construction error. Dispatch to the
//! owning device happens in the bus, which owns the devices themselves;
//! the table only answers "who is at this address".

use crate::error::BusError;

/// The two address spaces of the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    /// CPU space: 64K, RAM / PPU registers / APU / cartridge PRG.
    Cpu,
    /// PPU space: 16K, CHR / nametables / palette.
    Ppu,
}

/// Bus participants a table entry can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// 2K internal RAM, mirrored through $1FFF.
    Ram,
    /// PPU register file, mirrored every 8 bytes through $3FFF.
    PpuRegs,
    /// APU channel and status registers.
    Apu,
    /// OAM DMA port ($4014).
    OamDma,
    /// Controller I/O ports ($4016-$4017).
    IoPorts,
    /// Cartridge PRG side (ranges declared by the mapper).
    Cartridge,
    /// Cartridge CHR side (PPU space).
    Chr,
    /// Nametable RAM behind the mirroring routing table.
    Nametables,
    /// Palette RAM.
    Palette,
}

/// Byte-granular routing table for one address space.
pub struct MemoryMap {
    space: AddressSpace,
    table: Box<[Option<DeviceKind>]>,
}

impl MemoryMap {
    #[must_use]
    pub fn new(space: AddressSpace) -> Self {
        let size = match space {
            AddressSpace::Cpu => 0x1_0000,
            AddressSpace::Ppu => 0x4000,
        };
        Self {
            space,
            table: vec![None; size].into_boxed_slice(),
        }
    }

    /// Claim `start..=end` for `device`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Overlap`] if any byte of the range is already
    /// claimed. The table is left unchanged on failure.
    pub fn map(&mut self, start: u16, end: u16, device: DeviceKind) -> Result<(), BusError> {
        let range = start as usize..=end as usize;
        if self.table[range.clone()].iter().any(Option::is_some) {
            return Err(BusError::Overlap {
                space: self.space,
                start,
                end,
            });
        }
        for slot in &mut self.table[range] {
            *slot = Some(device);
        }
        Ok(())
    }

    /// The device claiming `addr`, or `None` for open bus.
    #[must_use]
    pub fn device_at(&self, addr: u16) -> Option<DeviceKind> {
        self.table.get(addr as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_resolve() {
        let mut map = MemoryMap::new(AddressSpace::Cpu);
        map.map(0x0000, 0x1FFF, DeviceKind::Ram).unwrap();
        map.map(0x2000, 0x3FFF, DeviceKind::PpuRegs).unwrap();

        assert_eq!(map.device_at(0x0000), Some(DeviceKind::Ram));
        assert_eq!(map.device_at(0x1FFF), Some(DeviceKind::Ram));
        assert_eq!(map.device_at(0x2002), Some(DeviceKind::PpuRegs));
        assert_eq!(map.device_at(0x5000), None);
    }

    #[test]
    fn overlap_is_rejected() {
        let mut map = MemoryMap::new(AddressSpace::Cpu);
        map.map(0x8000, 0xFFFF, DeviceKind::Cartridge).unwrap();

        let err = map.map(0xC000, 0xC000, DeviceKind::Ram).unwrap_err();
        assert!(matches!(err, BusError::Overlap { start: 0xC000, .. }));

        // The failed claim must not have touched the table.
        assert_eq!(map.device_at(0xC000), Some(DeviceKind::Cartridge));
    }

    #[test]
    fn single_byte_claims() {
        let mut map = MemoryMap::new(AddressSpace::Cpu);
        map.map(0x4014, 0x4014, DeviceKind::OamDma).unwrap();
        map.map(0x4016, 0x4017, DeviceKind::IoPorts).unwrap();

        assert_eq!(map.device_at(0x4014), Some(DeviceKind::OamDma));
        assert_eq!(map.device_at(0x4015), None);
        assert_eq!(map.device_at(0x4016), Some(DeviceKind::IoPorts));
    }
}
