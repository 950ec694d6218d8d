//! The assembled machine: CPU, buses, cartridge, controllers.
//!
//! `Console` is the synchronous emulation core the scheduler drives. It
//! owns no threads and no channels, just the wired hardware and the
//! step primitives: one CPU instruction, one PPU cycle, one APU cycle.

use std::sync::Arc;

use crate::apu::Apu;
use crate::bus::CpuBus;
use crate::cartridge::{Cartridge, RomImage};
use crate::controller::{Controllers, InputLatches};
use crate::cpu::Cpu;
use crate::error::{CpuError, EngineError, SnapshotError};
use crate::interrupt::InterruptLine;
use crate::ppu::FrameBuffer;
use crate::snapshot::Snapshot;
use crate::timing::Region;

pub struct Console {
    cpu: Cpu,
    pub(crate) bus: CpuBus,
    region: Region,
    game_name: String,
    total_cycles: u64,
    /// Mapper scanline-counter capability, queried once at wiring.
    scanline_hook: bool,
}

impl Console {
    /// Wire a console around a parsed ROM image.
    ///
    /// The PPU's NMI and the mapper's IRQ are standalone shared lines;
    /// the bus owns every device, so there are no ownership cycles.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for unsupported mappers or bus claim
    /// conflicts.
    pub fn new(rom: RomImage, latches: Arc<InputLatches>) -> Result<Self, EngineError> {
        let nmi = InterruptLine::new();
        let irq = InterruptLine::new();
        let region = rom.region;
        let game_name = rom.game_name.clone();

        let cart = Cartridge::new(rom, irq.clone())?;
        let ppu = crate::ppu::Ppu::new(region, nmi.clone(), cart.mapper.chr_ranges())?;
        let apu = Apu::new(region.cpu_hz());
        let controllers = Controllers::new(latches);
        let scanline_hook = cart.mapper.has_scanline_counter();
        let bus = CpuBus::new(cart, ppu, apu, controllers)?;

        Ok(Self {
            cpu: Cpu::new(nmi, irq),
            bus,
            region,
            game_name,
            total_cycles: 0,
            scanline_hook,
        })
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    #[must_use]
    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    pub fn enable_decode(&mut self) {
        self.cpu.enable_decode();
    }

    /// Power-cycle the machine: all memories cleared, CPU at the reset
    /// vector, clocks at zero.
    pub fn reset(&mut self) {
        self.bus.cart.mapper.reset();
        self.bus.ppu.reset();
        self.bus.apu.reset();
        self.bus.controllers.reset();
        self.bus.ram = [0; 0x800];
        self.bus.open_bus = 0;
        self.bus.oam_dma = None;
        self.cpu.reset(&mut self.bus);
        self.total_cycles = 0;
    }

    /// Execute one CPU instruction (or a pending OAM DMA transfer) and
    /// return the cycles consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CpuError`] on undocumented opcodes; fatal to the engine.
    pub fn cpu_step(&mut self) -> Result<u16, CpuError> {
        let cycles = if let Some(page) = self.bus.take_oam_dma() {
            self.run_oam_dma(page)
        } else {
            self.cpu.step(&mut self.bus)?
        };
        self.total_cycles += u64::from(cycles);
        Ok(cycles)
    }

    fn run_oam_dma(&mut self, page: u8) -> u16 {
        use crate::bus::Bus;
        let base = u16::from(page) << 8;
        for i in 0..256 {
            let value = self.bus.read(base + i);
            self.bus.ppu.write_oam(value);
        }
        // 513 cycles, plus one alignment cycle when started on an odd one.
        513 + u16::from(self.total_cycles % 2 == 1)
    }

    /// Advance the PPU one cycle. Returns the framebuffer at a frame
    /// boundary.
    pub fn ppu_step(&mut self) -> Option<FrameBuffer> {
        self.bus.ppu_step()
    }

    /// Clock the APU one CPU cycle; returns a sample at ~44.1 kHz.
    pub fn apu_sample(&mut self) -> Option<i16> {
        self.bus.apu.step()
    }

    /// Total CPU cycles executed since the last reset.
    #[must_use]
    pub fn cpu_cycles(&self) -> u64 {
        self.total_cycles
    }

    #[must_use]
    pub fn scanline(&self) -> u16 {
        self.bus.ppu.scanline()
    }

    #[must_use]
    pub fn ppu_dot(&self) -> u16 {
        self.bus.ppu.dot()
    }

    #[must_use]
    pub fn ppu_frame(&self) -> u64 {
        self.bus.ppu.frame()
    }

    /// Whether the mapper wants scanline ticks at all.
    #[must_use]
    pub fn has_scanline_hook(&self) -> bool {
        self.scanline_hook
    }

    /// True on the one PPU cycle per scanline the mapper observes.
    #[must_use]
    pub fn scanline_trigger(&self) -> bool {
        self.bus.ppu.scanline_counter_trigger()
    }

    /// Clock the mapper's scanline counter.
    pub fn scanline_tick(&mut self) {
        self.bus.cart.mapper.scanline_tick();
    }

    pub fn load_battery(&mut self) {
        self.bus.cart.load_battery();
    }

    pub fn save_battery(&self) {
        self.bus.cart.save_battery();
    }

    /// Capture the full machine state. The scheduler supplies its own
    /// in-flight fields (cycle quota and step mode).
    #[must_use]
    pub fn snapshot(&self, ppu_quota: u64, step_mode: crate::scheduler::StepMode) -> Snapshot {
        Snapshot {
            cpu: self.cpu.snapshot(),
            ram: self.bus.ram.to_vec(),
            open_bus: self.bus.open_bus,
            total_cycles: self.total_cycles,
            oam_dma: self.bus.oam_dma,
            apu: self.bus.apu.snapshot(),
            ppu: self.bus.ppu.snapshot(),
            mapper: self.bus.cart.mapper.snapshot(),
            controllers: self.bus.controllers.snapshot(),
            ppu_quota,
            step_mode,
        }
    }

    /// Restore a snapshot, all-or-nothing. Returns the scheduler fields.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] without touching any state when the
    /// snapshot belongs to a different mapper.
    pub fn restore(
        &mut self,
        snap: &Snapshot,
    ) -> Result<(u64, crate::scheduler::StepMode), SnapshotError> {
        // The mapper restore is the only fallible part; do it first so a
        // rejected snapshot leaves the machine untouched.
        self.bus.cart.mapper.restore(&snap.mapper)?;

        self.cpu.restore(&snap.cpu);
        if snap.ram.len() == self.bus.ram.len() {
            self.bus.ram.copy_from_slice(&snap.ram);
        }
        self.bus.open_bus = snap.open_bus;
        self.total_cycles = snap.total_cycles;
        self.bus.oam_dma = snap.oam_dma;
        self.bus.apu.restore(&snap.apu);
        self.bus.ppu.restore(&snap.ppu);
        self.bus.controllers.restore(&snap.controllers);
        Ok((snap.ppu_quota, snap.step_mode))
    }
}
