//! PPU (2C02) core.
//!
//! Dot-stepped: one `step()` consumes exactly one PPU cycle and advances
//! the (scanline, dot, frame) position. Scanline layout:
//! - 0-239: visible (pixels rendered)
//! - 240: post-render (idle)
//! - 241..: vblank, entered with the NMI at dot 1 of scanline 241
//! - last (261 NTSC / 311 PAL): pre-render
//!
//! The completed framebuffer (palette color indices) is returned by the
//! step that moves the position into scanline 241, one dot before vblank
//! is set, so a frame event is always observable before any vblank work.
//!
//! PPU-space addresses go through a [`MemoryMap`] like the CPU bus:
//! cartridge CHR, nametable RAM behind the mirroring routing table, and
//! palette RAM each claim their ranges at wiring time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cartridge::{Mapper, Mirroring};
use crate::error::BusError;
use crate::interrupt::InterruptLine;
use crate::memmap::{AddressSpace, DeviceKind, MemoryMap};
use crate::timing::Region;

/// Framebuffer dimensions.
pub const FB_WIDTH: usize = 256;
pub const FB_HEIGHT: usize = 240;

/// A completed frame: one palette color index (0-63) per pixel.
pub type FrameBuffer = Vec<u8>;

/// Scanline on which vblank begins, both regions.
const VBLANK_LINE: u16 = 241;

/// Nametable routing: logical table -> physical 1K page.
fn nt_page(mirroring: Mirroring, table: u16) -> usize {
    let table = (table & 3) as usize;
    match mirroring {
        Mirroring::Horizontal => [0, 0, 1, 1][table],
        Mirroring::Vertical => [0, 1, 0, 1][table],
        Mirroring::FourScreen => table,
    }
}

fn palette_index(addr: u16) -> usize {
    let mut i = (addr & 0x1F) as usize;
    // $3F10/$3F14/$3F18/$3F1C mirror the background entries.
    if i >= 16 && i % 4 == 0 {
        i -= 16;
    }
    i
}

/// Serialized PPU state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpuState {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub v: u16,
    pub t: u16,
    pub fine_x: u8,
    pub w: bool,
    pub read_buffer: u8,
    pub scanline: u16,
    pub dot: u16,
    pub frame: u64,
    pub odd_frame: bool,
    pub nmi_occurred: bool,
    pub bg_shift: [u16; 4],
    pub bg_latch: [u8; 4],
    pub sprite_count: u8,
    pub sprite_patterns: [[u8; 2]; 8],
    pub sprite_attrs: [u8; 8],
    pub sprite_x: [u8; 8],
    pub sprite_indexes: [u8; 8],
    pub nametables: Vec<u8>,
    pub palette: Vec<u8>,
    pub oam: Vec<u8>,
    pub framebuffer: Vec<u8>,
}

pub struct Ppu {
    // Register file
    ctrl: u8,
    mask: u8,
    status: u8,
    oam_addr: u8,

    // Loopy scroll/address state
    v: u16,
    t: u16,
    fine_x: u8,
    w: bool,
    read_buffer: u8,

    // Memories
    map: MemoryMap,
    nametables: [u8; 4096],
    palette: [u8; 32],
    oam: [u8; 256],

    // Position
    scanline: u16,
    dot: u16,
    frame: u64,
    odd_frame: bool,
    scanlines_per_frame: u16,
    odd_frame_skip: bool,

    // Background pipeline
    bg_shift_lo: u16,
    bg_shift_hi: u16,
    bg_attr_lo: u16,
    bg_attr_hi: u16,
    next_tile_id: u8,
    next_tile_attr: u8,
    next_tile_lo: u8,
    next_tile_hi: u8,

    // Sprites for the line being drawn
    sprite_count: u8,
    sprite_patterns: [[u8; 2]; 8],
    sprite_attrs: [u8; 8],
    sprite_x: [u8; 8],
    sprite_indexes: [u8; 8],

    // Output and signals
    framebuffer: Vec<u8>,
    scanline_edge: bool,
    nmi_occurred: bool,
    nmi: Arc<InterruptLine>,
}

impl Ppu {
    /// Wire up a PPU: claims CHR (from the mapper's declared ranges),
    /// nametable and palette regions in the PPU address space.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Overlap`] if the mapper's CHR claim collides
    /// with the PPU-internal regions.
    pub fn new(
        region: Region,
        nmi: Arc<InterruptLine>,
        chr_ranges: &[(u16, u16)],
    ) -> Result<Self, BusError> {
        let mut map = MemoryMap::new(AddressSpace::Ppu);
        for &(start, end) in chr_ranges {
            map.map(start, end, DeviceKind::Chr)?;
        }
        map.map(0x2000, 0x3EFF, DeviceKind::Nametables)?;
        map.map(0x3F00, 0x3FFF, DeviceKind::Palette)?;

        let scanlines_per_frame = region.scanlines_per_frame();
        Ok(Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            v: 0,
            t: 0,
            fine_x: 0,
            w: false,
            read_buffer: 0,
            map,
            nametables: [0; 4096],
            palette: [0; 32],
            oam: [0; 256],
            scanline: scanlines_per_frame - 1,
            dot: 0,
            frame: 0,
            odd_frame: false,
            scanlines_per_frame,
            odd_frame_skip: region == Region::Ntsc,
            bg_shift_lo: 0,
            bg_shift_hi: 0,
            bg_attr_lo: 0,
            bg_attr_hi: 0,
            next_tile_id: 0,
            next_tile_attr: 0,
            next_tile_lo: 0,
            next_tile_hi: 0,
            sprite_count: 0,
            sprite_patterns: [[0; 2]; 8],
            sprite_attrs: [0; 8],
            sprite_x: [0xFF; 8],
            sprite_indexes: [0; 8],
            framebuffer: vec![0; FB_WIDTH * FB_HEIGHT],
            scanline_edge: false,
            nmi_occurred: false,
            nmi,
        })
    }

    pub fn reset(&mut self) {
        let lines = self.scanlines_per_frame;
        self.ctrl = 0;
        self.mask = 0;
        self.status = 0;
        self.oam_addr = 0;
        self.v = 0;
        self.t = 0;
        self.fine_x = 0;
        self.w = false;
        self.read_buffer = 0;
        self.nametables = [0; 4096];
        self.palette = [0; 32];
        self.oam = [0; 256];
        self.scanline = lines - 1;
        self.dot = 0;
        self.frame = 0;
        self.odd_frame = false;
        self.bg_shift_lo = 0;
        self.bg_shift_hi = 0;
        self.bg_attr_lo = 0;
        self.bg_attr_hi = 0;
        self.next_tile_id = 0;
        self.next_tile_attr = 0;
        self.next_tile_lo = 0;
        self.next_tile_hi = 0;
        self.sprite_count = 0;
        self.sprite_x = [0xFF; 8];
        self.framebuffer.fill(0);
        self.scanline_edge = false;
        self.nmi_occurred = false;
    }

    #[must_use]
    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    #[must_use]
    pub fn dot(&self) -> u16 {
        self.dot
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// True for exactly one PPU cycle per rendered scanline, at the edge
    /// MMC3-style scanline counters observe.
    #[must_use]
    pub fn scanline_counter_trigger(&self) -> bool {
        self.scanline_edge
    }

    fn rendering_enabled(&self) -> bool {
        self.mask & 0x18 != 0
    }

    fn pre_render_line(&self) -> u16 {
        self.scanlines_per_frame - 1
    }

    /// Consume one PPU cycle. Returns the framebuffer on the cycle that
    /// completes a frame.
    pub fn step(&mut self, mapper: &mut dyn Mapper) -> Option<FrameBuffer> {
        let prerender = self.scanline == self.pre_render_line();
        let visible = self.scanline < FB_HEIGHT as u16;
        let fetch_line = visible || prerender;
        let rendering = self.rendering_enabled();

        self.scanline_edge = rendering && fetch_line && self.dot == 260;

        if prerender && self.dot == 1 {
            // Leave vblank: clear vblank, sprite 0 hit, overflow.
            self.status &= 0x1F;
            self.nmi_occurred = false;
        }

        if visible && (1..=256).contains(&self.dot) {
            self.render_pixel();
        }

        if rendering && fetch_line {
            if (1..=256).contains(&self.dot) || (321..=336).contains(&self.dot) {
                self.shift_background();
                self.fetch_background(mapper);
            }
            if self.dot == 256 {
                self.increment_y();
            }
            if self.dot == 257 {
                self.copy_x();
                self.evaluate_sprites(mapper);
            }
            if prerender && (280..=304).contains(&self.dot) {
                self.copy_y();
            }
        }

        if self.scanline == VBLANK_LINE && self.dot == 1 {
            self.status |= 0x80;
            self.nmi_occurred = true;
            if self.ctrl & 0x80 != 0 {
                self.nmi.raise();
            }
        }

        self.advance(rendering)
    }

    fn advance(&mut self, rendering: bool) -> Option<FrameBuffer> {
        // NTSC skips the last dot of the pre-render line on odd frames.
        if self.odd_frame_skip
            && rendering
            && self.odd_frame
            && self.scanline == self.pre_render_line()
            && self.dot == 339
        {
            self.dot = 340;
        }

        self.dot += 1;
        if self.dot <= 340 {
            return None;
        }
        self.dot = 0;
        self.scanline += 1;
        if self.scanline == VBLANK_LINE {
            self.frame += 1;
            return Some(self.framebuffer.clone());
        }
        if self.scanline >= self.scanlines_per_frame {
            self.scanline = 0;
            self.odd_frame = !self.odd_frame;
        }
        None
    }

    // ------------------------------------------------------------------
    // Background pipeline
    // ------------------------------------------------------------------

    fn fetch_background(&mut self, mapper: &mut dyn Mapper) {
        match self.dot % 8 {
            1 => {
                self.reload_shifters();
                self.next_tile_id = self.mem_read(0x2000 | (self.v & 0x0FFF), mapper);
            }
            3 => {
                let addr = 0x23C0
                    | (self.v & 0x0C00)
                    | ((self.v >> 4) & 0x38)
                    | ((self.v >> 2) & 0x07);
                let attr = self.mem_read(addr, mapper);
                let shift = ((self.v >> 4) & 4) | (self.v & 2);
                self.next_tile_attr = (attr >> shift) & 3;
            }
            5 => {
                self.next_tile_lo = self.mem_read(self.bg_pattern_addr(), mapper);
            }
            7 => {
                self.next_tile_hi = self.mem_read(self.bg_pattern_addr() + 8, mapper);
            }
            0 => self.increment_x(),
            _ => {}
        }
    }

    fn bg_pattern_addr(&self) -> u16 {
        let table = u16::from(self.ctrl & 0x10) << 8; // $0000 or $1000
        let fine_y = (self.v >> 12) & 7;
        table + u16::from(self.next_tile_id) * 16 + fine_y
    }

    fn reload_shifters(&mut self) {
        self.bg_shift_lo = (self.bg_shift_lo & 0xFF00) | u16::from(self.next_tile_lo);
        self.bg_shift_hi = (self.bg_shift_hi & 0xFF00) | u16::from(self.next_tile_hi);
        let attr_lo = if self.next_tile_attr & 1 != 0 { 0xFF } else { 0 };
        let attr_hi = if self.next_tile_attr & 2 != 0 { 0xFF } else { 0 };
        self.bg_attr_lo = (self.bg_attr_lo & 0xFF00) | attr_lo;
        self.bg_attr_hi = (self.bg_attr_hi & 0xFF00) | attr_hi;
    }

    fn shift_background(&mut self) {
        self.bg_shift_lo <<= 1;
        self.bg_shift_hi <<= 1;
        self.bg_attr_lo <<= 1;
        self.bg_attr_hi <<= 1;
    }

    fn increment_x(&mut self) {
        if self.v & 0x001F == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if self.v & 0x7000 != 0x7000 {
            self.v += 0x1000;
        } else {
            self.v &= !0x7000;
            let mut y = (self.v & 0x03E0) >> 5;
            if y == 29 {
                y = 0;
                self.v ^= 0x0800;
            } else if y == 31 {
                y = 0;
            } else {
                y += 1;
            }
            self.v = (self.v & !0x03E0) | (y << 5);
        }
    }

    fn copy_x(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_y(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    // ------------------------------------------------------------------
    // Sprites
    // ------------------------------------------------------------------

    fn sprite_height(&self) -> u16 {
        if self.ctrl & 0x20 != 0 { 16 } else { 8 }
    }

    /// Evaluate and fetch sprites for the next scanline (8-sprite limit).
    fn evaluate_sprites(&mut self, mapper: &mut dyn Mapper) {
        let next = if self.scanline == self.pre_render_line() {
            0
        } else {
            self.scanline + 1
        };
        let height = self.sprite_height();

        self.sprite_count = 0;
        self.sprite_x = [0xFF; 8];
        for i in 0..64 {
            let y = u16::from(self.oam[i * 4]);
            // OAM Y is the line before the sprite's first visible line.
            let Some(row) = next.checked_sub(y + 1) else {
                continue;
            };
            if row >= height {
                continue;
            }
            if self.sprite_count == 8 {
                self.status |= 0x20; // sprite overflow
                break;
            }
            let slot = self.sprite_count as usize;
            let attr = self.oam[i * 4 + 2];
            let row = if attr & 0x80 != 0 {
                height - 1 - row // vertical flip
            } else {
                row
            };
            let tile = self.oam[i * 4 + 1];
            let addr = if height == 16 {
                let table = u16::from(tile & 1) * 0x1000;
                let tile = u16::from(tile & 0xFE) + u16::from(row >= 8);
                table + tile * 16 + (row & 7)
            } else {
                let table = u16::from(self.ctrl & 0x08) << 9; // $0000 or $1000
                table + u16::from(tile) * 16 + row
            };
            let mut lo = self.mem_read(addr, mapper);
            let mut hi = self.mem_read(addr + 8, mapper);
            if attr & 0x40 != 0 {
                lo = lo.reverse_bits();
                hi = hi.reverse_bits();
            }
            self.sprite_patterns[slot] = [lo, hi];
            self.sprite_attrs[slot] = attr;
            self.sprite_x[slot] = self.oam[i * 4 + 3];
            self.sprite_indexes[slot] = i as u8;
            self.sprite_count += 1;
        }
    }

    fn render_pixel(&mut self) {
        let x = (self.dot - 1) as usize;
        let y = self.scanline as usize;

        let bg_enabled = self.mask & 0x08 != 0 && (x >= 8 || self.mask & 0x02 != 0);
        let sp_enabled = self.mask & 0x10 != 0 && (x >= 8 || self.mask & 0x04 != 0);

        let mut bg_pixel = 0u8;
        let mut bg_palette = 0u8;
        if bg_enabled {
            let bit = 0x8000 >> self.fine_x;
            bg_pixel = u8::from(self.bg_shift_hi & bit != 0) << 1
                | u8::from(self.bg_shift_lo & bit != 0);
            bg_palette = u8::from(self.bg_attr_hi & bit != 0) << 1
                | u8::from(self.bg_attr_lo & bit != 0);
        }

        let mut sp_pixel = 0u8;
        let mut sp_palette = 0u8;
        let mut sp_behind = false;
        let mut sp_zero = false;
        if sp_enabled {
            for slot in 0..self.sprite_count as usize {
                let sx = self.sprite_x[slot] as usize;
                let Some(col) = x.checked_sub(sx) else {
                    continue;
                };
                if col >= 8 {
                    continue;
                }
                let [lo, hi] = self.sprite_patterns[slot];
                let pixel =
                    u8::from(hi & (0x80 >> col) != 0) << 1 | u8::from(lo & (0x80 >> col) != 0);
                if pixel == 0 {
                    continue;
                }
                sp_pixel = pixel;
                sp_palette = self.sprite_attrs[slot] & 3;
                sp_behind = self.sprite_attrs[slot] & 0x20 != 0;
                sp_zero = self.sprite_indexes[slot] == 0;
                break;
            }
        }

        if bg_pixel != 0 && sp_pixel != 0 && sp_zero && x != 255 {
            self.status |= 0x40; // sprite 0 hit
        }

        let palette_addr = match (bg_pixel, sp_pixel) {
            (0, 0) => 0,
            (0, _) => 0x10 | (sp_palette << 2) | sp_pixel,
            (_, 0) => (bg_palette << 2) | bg_pixel,
            _ if sp_behind => (bg_palette << 2) | bg_pixel,
            _ => 0x10 | (sp_palette << 2) | sp_pixel,
        };
        let color = self.palette[palette_index(u16::from(palette_addr))] & 0x3F;
        self.framebuffer[y * FB_WIDTH + x] = color;
    }

    // ------------------------------------------------------------------
    // CPU register interface ($2000-$2007)
    // ------------------------------------------------------------------

    pub fn cpu_read(&mut self, reg: u16, mapper: &mut dyn Mapper) -> u8 {
        match reg & 7 {
            2 => {
                let value = self.status;
                self.status &= 0x7F;
                self.nmi_occurred = false;
                self.w = false;
                value
            }
            4 => self.oam[self.oam_addr as usize],
            7 => {
                let addr = self.v & 0x3FFF;
                let value = if addr >= 0x3F00 {
                    // Palette reads are unbuffered; the buffer still loads
                    // from the nametable underneath.
                    self.read_buffer = self.mem_read(addr & 0x2FFF, mapper);
                    self.mem_read(addr, mapper)
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = self.mem_read(addr, mapper);
                    buffered
                };
                self.v = self.v.wrapping_add(self.vram_increment());
                value
            }
            _ => 0,
        }
    }

    pub fn cpu_write(&mut self, reg: u16, value: u8, mapper: &mut dyn Mapper) {
        match reg & 7 {
            0 => {
                let was_enabled = self.ctrl & 0x80 != 0;
                self.ctrl = value;
                self.t = (self.t & !0x0C00) | (u16::from(value & 0x03) << 10);
                // Enabling NMI while vblank is set raises it immediately.
                if !was_enabled && value & 0x80 != 0 && self.nmi_occurred {
                    self.nmi.raise();
                }
            }
            1 => self.mask = value,
            3 => self.oam_addr = value,
            4 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            5 => {
                if self.w {
                    self.t = (self.t & !0x73E0)
                        | (u16::from(value & 0xF8) << 2)
                        | (u16::from(value & 0x07) << 12);
                } else {
                    self.t = (self.t & !0x001F) | (u16::from(value) >> 3);
                    self.fine_x = value & 0x07;
                }
                self.w = !self.w;
            }
            6 => {
                if self.w {
                    self.t = (self.t & 0xFF00) | u16::from(value);
                    self.v = self.t;
                } else {
                    self.t = (self.t & 0x00FF) | (u16::from(value & 0x3F) << 8);
                }
                self.w = !self.w;
            }
            7 => {
                let addr = self.v & 0x3FFF;
                self.mem_write(addr, value, mapper);
                self.v = self.v.wrapping_add(self.vram_increment());
            }
            _ => {}
        }
    }

    fn vram_increment(&self) -> u16 {
        if self.ctrl & 0x04 != 0 { 32 } else { 1 }
    }

    /// Direct OAM write (OAM DMA path).
    pub fn write_oam(&mut self, value: u8) {
        self.oam[self.oam_addr as usize] = value;
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    // ------------------------------------------------------------------
    // PPU-space memory access
    // ------------------------------------------------------------------

    fn mem_read(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let addr = addr & 0x3FFF;
        match self.map.device_at(addr) {
            Some(DeviceKind::Chr) => mapper.chr_read(addr),
            Some(DeviceKind::Nametables) => {
                self.nametables[nt_offset(addr, mapper.mirroring())]
            }
            Some(DeviceKind::Palette) => self.palette[palette_index(addr)],
            _ => 0,
        }
    }

    fn mem_write(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        let addr = addr & 0x3FFF;
        match self.map.device_at(addr) {
            Some(DeviceKind::Chr) => mapper.chr_write(addr, value),
            Some(DeviceKind::Nametables) => {
                self.nametables[nt_offset(addr, mapper.mirroring())] = value;
            }
            Some(DeviceKind::Palette) => self.palette[palette_index(addr)] = value,
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> PpuState {
        PpuState {
            ctrl: self.ctrl,
            mask: self.mask,
            status: self.status,
            oam_addr: self.oam_addr,
            v: self.v,
            t: self.t,
            fine_x: self.fine_x,
            w: self.w,
            read_buffer: self.read_buffer,
            scanline: self.scanline,
            dot: self.dot,
            frame: self.frame,
            odd_frame: self.odd_frame,
            nmi_occurred: self.nmi_occurred,
            bg_shift: [
                self.bg_shift_lo,
                self.bg_shift_hi,
                self.bg_attr_lo,
                self.bg_attr_hi,
            ],
            bg_latch: [
                self.next_tile_id,
                self.next_tile_attr,
                self.next_tile_lo,
                self.next_tile_hi,
            ],
            sprite_count: self.sprite_count,
            sprite_patterns: self.sprite_patterns,
            sprite_attrs: self.sprite_attrs,
            sprite_x: self.sprite_x,
            sprite_indexes: self.sprite_indexes,
            nametables: self.nametables.to_vec(),
            palette: self.palette.to_vec(),
            oam: self.oam.to_vec(),
            framebuffer: self.framebuffer.clone(),
        }
    }

    pub fn restore(&mut self, state: &PpuState) {
        self.ctrl = state.ctrl;
        self.mask = state.mask;
        self.status = state.status;
        self.oam_addr = state.oam_addr;
        self.v = state.v;
        self.t = state.t;
        self.fine_x = state.fine_x;
        self.w = state.w;
        self.read_buffer = state.read_buffer;
        self.scanline = state.scanline;
        self.dot = state.dot;
        self.frame = state.frame;
        self.odd_frame = state.odd_frame;
        self.nmi_occurred = state.nmi_occurred;
        [self.bg_shift_lo, self.bg_shift_hi, self.bg_attr_lo, self.bg_attr_hi] = state.bg_shift;
        [self.next_tile_id, self.next_tile_attr, self.next_tile_lo, self.next_tile_hi] =
            state.bg_latch;
        self.sprite_count = state.sprite_count;
        self.sprite_patterns = state.sprite_patterns;
        self.sprite_attrs = state.sprite_attrs;
        self.sprite_x = state.sprite_x;
        self.sprite_indexes = state.sprite_indexes;
        if state.nametables.len() == self.nametables.len() {
            self.nametables.copy_from_slice(&state.nametables);
        }
        if state.palette.len() == self.palette.len() {
            self.palette.copy_from_slice(&state.palette);
        }
        if state.oam.len() == self.oam.len() {
            self.oam.copy_from_slice(&state.oam);
        }
        if state.framebuffer.len() == self.framebuffer.len() {
            self.framebuffer.copy_from_slice(&state.framebuffer);
        }
    }
}

fn nt_offset(addr: u16, mirroring: Mirroring) -> usize {
    let table = (addr - 0x2000) >> 10;
    nt_page(mirroring, table) * 0x400 + (addr as usize & 0x3FF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::Nrom;

    fn ppu_and_mapper() -> (Ppu, Nrom) {
        let ppu = Ppu::new(Region::Ntsc, InterruptLine::new(), &[(0x0000, 0x1FFF)]).unwrap();
        let mapper = Nrom::new(vec![0; 16384], vec![0; 8192], Mirroring::Horizontal);
        (ppu, mapper)
    }

    /// Step to the given position from power-on.
    fn step_to(ppu: &mut Ppu, mapper: &mut Nrom, scanline: u16, dot: u16) {
        while !(ppu.scanline() == scanline && ppu.dot() == dot) {
            ppu.step(mapper);
        }
    }

    #[test]
    fn frame_completes_entering_vblank_line() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut steps = 0u64;
        let frame = loop {
            steps += 1;
            if let Some(f) = ppu.step(&mut mapper) {
                break f;
            }
        };
        assert_eq!(frame.len(), FB_WIDTH * FB_HEIGHT);
        assert_eq!((ppu.scanline(), ppu.dot()), (241, 0));
        assert_eq!(ppu.frame(), 1);
        // Power-on position is (261, 0): one pre-render line plus 241 lines.
        assert_eq!(steps, 341 * 242);
    }

    #[test]
    fn one_frame_event_per_frame() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let mut frames = 0;
        for _ in 0..(341 * 262 * 3) {
            if ppu.step(&mut mapper).is_some() {
                frames += 1;
            }
        }
        assert_eq!(frames, 3);
    }

    #[test]
    fn nmi_raised_at_vblank_when_enabled() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let nmi = ppu.nmi.clone();
        ppu.cpu_write(0, 0x80, &mut mapper); // enable NMI

        step_to(&mut ppu, &mut mapper, 241, 1);
        assert!(!nmi.take()); // not yet: dot 1 work happens during this step
        ppu.step(&mut mapper);
        assert!(nmi.take());
        assert_ne!(ppu.status & 0x80, 0);
    }

    #[test]
    fn enabling_nmi_during_vblank_raises_immediately() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        let nmi = ppu.nmi.clone();
        step_to(&mut ppu, &mut mapper, 250, 0);
        assert!(!nmi.take());

        ppu.cpu_write(0, 0x80, &mut mapper);
        assert!(nmi.take());
    }

    #[test]
    fn status_read_clears_vblank_and_write_toggle() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        step_to(&mut ppu, &mut mapper, 242, 0);

        let status = ppu.cpu_read(2, &mut mapper);
        assert_ne!(status & 0x80, 0);
        assert_eq!(ppu.cpu_read(2, &mut mapper) & 0x80, 0);
    }

    #[test]
    fn data_reads_are_buffered() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        // Write $AB to $2000 (nametable), then read it back via $2007.
        ppu.cpu_write(6, 0x20, &mut mapper);
        ppu.cpu_write(6, 0x00, &mut mapper);
        ppu.cpu_write(7, 0xAB, &mut mapper);

        ppu.cpu_write(6, 0x20, &mut mapper);
        ppu.cpu_write(6, 0x00, &mut mapper);
        let first = ppu.cpu_read(7, &mut mapper); // stale buffer
        let second = ppu.cpu_read(7, &mut mapper);
        assert_eq!(first, 0x00);
        assert_eq!(second, 0xAB);
    }

    #[test]
    fn nametable_mirroring_routes_writes() {
        let (mut ppu, _) = ppu_and_mapper();
        let mut horizontal = Nrom::new(vec![0; 16384], vec![0; 8192], Mirroring::Horizontal);

        // Horizontal: $2000 and $2400 share a page.
        ppu.mem_write(0x2005, 0x42, &mut horizontal);
        assert_eq!(ppu.mem_read(0x2405, &mut horizontal), 0x42);

        let mut vertical = Nrom::new(vec![0; 16384], vec![0; 8192], Mirroring::Vertical);
        ppu.mem_write(0x2805, 0x77, &mut vertical);
        assert_eq!(ppu.mem_read(0x2005, &mut vertical), 0x77);
        assert_ne!(ppu.mem_read(0x2405, &mut vertical), 0x77);
    }

    #[test]
    fn scanline_trigger_once_per_rendered_line() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        ppu.cpu_write(1, 0x08, &mut mapper); // show background

        // Run exactly one full frame and count trigger edges.
        let mut edges = 0;
        let mut frames = 0;
        while frames == 0 {
            if ppu.step(&mut mapper).is_some() {
                frames = 1;
            }
            if ppu.scanline_counter_trigger() {
                edges += 1;
            }
        }
        // Pre-render line + 240 visible lines before entering vblank.
        assert_eq!(edges, 241);
    }

    #[test]
    fn no_trigger_when_rendering_disabled() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        for _ in 0..(341 * 262) {
            ppu.step(&mut mapper);
            assert!(!ppu.scanline_counter_trigger());
        }
    }

    #[test]
    fn snapshot_round_trip_resumes_identically() {
        let (mut ppu, mut mapper) = ppu_and_mapper();
        ppu.cpu_write(0, 0x80, &mut mapper);
        ppu.cpu_write(1, 0x1E, &mut mapper);
        for _ in 0..100_000 {
            ppu.step(&mut mapper);
        }

        let state = ppu.snapshot();
        let (mut fresh, _) = ppu_and_mapper();
        fresh.restore(&state);

        for _ in 0..50_000 {
            let a = ppu.step(&mut mapper);
            let b = fresh.step(&mut mapper);
            assert_eq!(a.is_some(), b.is_some());
        }
        assert_eq!(ppu.snapshot().v, fresh.snapshot().v);
        assert_eq!(ppu.framebuffer, fresh.framebuffer);
    }
}
