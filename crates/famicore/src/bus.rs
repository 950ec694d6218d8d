//! CPU-space bus.
//!
//! Owns every CPU-visible device and routes reads/writes through the
//! [`MemoryMap`]. Reads from unmapped addresses return the open-bus byte
//! (the last value transferred on the bus); writes to unmapped addresses
//! are dropped. Both are normal bus behavior, not errors.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::controller::{Controllers, Port};
use crate::error::BusError;
use crate::memmap::{AddressSpace, DeviceKind, MemoryMap};
use crate::ppu::{FrameBuffer, Ppu};

/// Byte-wide memory access, as seen by the CPU.
pub trait Bus {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);

    /// Level IRQ sources reachable through the bus (the APU frame
    /// counter). The mapper drives its own interrupt line.
    fn poll_irq(&mut self) -> bool {
        false
    }
}

/// Flat 64K RAM bus for CPU-level tests.
pub struct SimpleBus {
    mem: Box<[u8; 0x1_0000]>,
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mem: Box::new([0; 0x1_0000]),
        }
    }

    /// Copy `bytes` into memory starting at `addr`.
    pub fn load(&mut self, addr: u16, bytes: &[u8]) {
        let start = addr as usize;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.mem[addr as usize] = value;
    }
}

/// The wired CPU bus: RAM, PPU registers, APU, DMA port, controller
/// ports, and the cartridge's declared ranges.
pub struct CpuBus {
    map: MemoryMap,
    pub(crate) open_bus: u8,
    pub(crate) ram: [u8; 0x800],
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) controllers: Controllers,
    pub(crate) cart: Cartridge,
    pub(crate) oam_dma: Option<u8>,
}

impl CpuBus {
    /// Wire the CPU address space. Each device claims its ranges; the
    /// cartridge claims whatever its mapper declares.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Overlap`] if any two claims collide.
    pub fn new(
        cart: Cartridge,
        ppu: Ppu,
        apu: Apu,
        controllers: Controllers,
    ) -> Result<Self, BusError> {
        let mut map = MemoryMap::new(AddressSpace::Cpu);
        map.map(0x0000, 0x1FFF, DeviceKind::Ram)?;
        map.map(0x2000, 0x3FFF, DeviceKind::PpuRegs)?;
        map.map(0x4000, 0x4013, DeviceKind::Apu)?;
        map.map(0x4014, 0x4014, DeviceKind::OamDma)?;
        map.map(0x4015, 0x4015, DeviceKind::Apu)?;
        map.map(0x4016, 0x4017, DeviceKind::IoPorts)?;
        for &(start, end) in cart.mapper.cpu_ranges() {
            map.map(start, end, DeviceKind::Cartridge)?;
        }

        Ok(Self {
            map,
            open_bus: 0,
            ram: [0; 0x800],
            ppu,
            apu,
            controllers,
            cart,
            oam_dma: None,
        })
    }

    /// Take a pending OAM DMA request ($4014 write).
    pub(crate) fn take_oam_dma(&mut self) -> Option<u8> {
        self.oam_dma.take()
    }

    /// Step the PPU one cycle against the cartridge CHR.
    pub(crate) fn ppu_step(&mut self) -> Option<FrameBuffer> {
        self.ppu.step(self.cart.mapper.as_mut())
    }
}

impl Bus for CpuBus {
    fn read(&mut self, addr: u16) -> u8 {
        let value = match self.map.device_at(addr) {
            Some(DeviceKind::Ram) => self.ram[(addr & 0x07FF) as usize],
            Some(DeviceKind::PpuRegs) => self.ppu.cpu_read(addr & 7, self.cart.mapper.as_mut()),
            Some(DeviceKind::Apu) => {
                if addr == 0x4015 {
                    self.apu.read_status()
                } else {
                    self.open_bus // write-only registers
                }
            }
            Some(DeviceKind::IoPorts) => {
                let port = if addr == 0x4016 { Port::One } else { Port::Two };
                // Upper bits float to open bus on real hardware.
                (self.open_bus & 0xE0) | self.controllers.read(port)
            }
            Some(DeviceKind::Cartridge) => self.cart.mapper.cpu_read(addr),
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.open_bus = value;
        match self.map.device_at(addr) {
            Some(DeviceKind::Ram) => self.ram[(addr & 0x07FF) as usize] = value,
            Some(DeviceKind::PpuRegs) => {
                self.ppu.cpu_write(addr & 7, value, self.cart.mapper.as_mut());
            }
            Some(DeviceKind::Apu) => self.apu.write(addr, value),
            Some(DeviceKind::OamDma) => self.oam_dma = Some(value),
            Some(DeviceKind::IoPorts) => {
                if addr == 0x4016 {
                    self.controllers.write_strobe(value);
                } else {
                    // $4017 writes hit the APU frame counter.
                    self.apu.write(0x4017, value);
                }
            }
            Some(DeviceKind::Cartridge) => self.cart.mapper.cpu_write(addr, value),
            _ => {} // dropped
        }
    }

    fn poll_irq(&mut self) -> bool {
        self.apu.irq_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{RomImage, test_rom};
    use crate::controller::{Button, InputLatches};
    use crate::interrupt::InterruptLine;
    use crate::timing::Region;
    use std::sync::Arc;

    fn wired_bus() -> (CpuBus, Arc<InputLatches>) {
        let data = test_rom::build(1, 1, 0x00, &[]);
        let rom = RomImage::from_bytes("test", &data).unwrap();
        let irq = InterruptLine::new();
        let cart = Cartridge::new(rom, irq).unwrap();
        let ppu = Ppu::new(Region::Ntsc, InterruptLine::new(), cart.mapper.chr_ranges()).unwrap();
        let apu = Apu::new(Region::Ntsc.cpu_hz());
        let latches = InputLatches::new();
        let controllers = Controllers::new(latches.clone());
        let bus = CpuBus::new(cart, ppu, apu, controllers).unwrap();
        (bus, latches)
    }

    #[test]
    fn ram_is_mirrored() {
        let (mut bus, _) = wired_bus();
        bus.write(0x0000, 0xAB);
        assert_eq!(bus.read(0x0800), 0xAB);
        assert_eq!(bus.read(0x1800), 0xAB);
    }

    #[test]
    fn ppu_registers_mirror_every_eight() {
        let (mut bus, _) = wired_bus();
        bus.write(0x2006, 0x3F);
        bus.write(0x3FFE, 0x00); // $2006 mirror
        bus.write(0x2007, 0x21);

        bus.write(0x2006, 0x3F);
        bus.write(0x2006, 0x00);
        assert_eq!(bus.read(0x2007), 0x21); // palette reads are unbuffered
    }

    #[test]
    fn open_bus_returns_last_value() {
        let (mut bus, _) = wired_bus();
        bus.read(0x8000); // NOP sled: $EA on the bus
        assert_eq!(bus.read(0x5000), 0xEA); // unmapped

        // Unmapped writes are dropped but still drive the bus.
        bus.write(0x5000, 0x33);
        assert_eq!(bus.read(0x5001), 0x33);
    }

    #[test]
    fn oam_dma_write_latches_page() {
        let (mut bus, _) = wired_bus();
        bus.write(0x4014, 0x02);
        assert_eq!(bus.take_oam_dma(), Some(0x02));
        assert_eq!(bus.take_oam_dma(), None);
    }

    #[test]
    fn controller_reads_through_the_bus() {
        let (mut bus, latches) = wired_bus();
        latches.set_button(Port::One, Button::A, true);

        bus.write(0x4016, 1);
        bus.write(0x4016, 0);
        assert_eq!(bus.read(0x4016) & 1, 1); // A
        assert_eq!(bus.read(0x4016) & 1, 0); // B
    }
}
