//! 2A03 CPU core: an NMOS 6502 without decimal mode.
//!
//! One `step()` executes exactly one instruction (or services one pending
//! interrupt) and returns the cycles consumed, including page-cross and
//! branch penalties. Undocumented opcodes are a fatal
//! [`CpuError::UnsupportedOpcode`]; the scheduler surfaces them and the
//! engine quits.

use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::error::CpuError;
use crate::interrupt::InterruptLine;

const FLAG_C: u8 = 0x01;
const FLAG_Z: u8 = 0x02;
const FLAG_I: u8 = 0x04;
const FLAG_D: u8 = 0x08;
const FLAG_B: u8 = 0x10;
const FLAG_U: u8 = 0x20;
const FLAG_V: u8 = 0x40;
const FLAG_N: u8 = 0x80;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Serialized register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub p: u8,
    pub nmi_pending: bool,
    pub irq_pending: bool,
}

pub struct Cpu {
    a: u8,
    x: u8,
    y: u8,
    sp: u8,
    pc: u16,
    p: u8,

    /// NMI line, raised by the PPU at vblank. Edge-triggered.
    nmi: Arc<InterruptLine>,
    /// IRQ line, driven by the mapper. Level-triggered; the APU frame IRQ
    /// is polled through the bus.
    irq: Arc<InterruptLine>,

    /// Instruction decode tracing via `log::trace!`.
    trace: bool,
}

impl Cpu {
    #[must_use]
    pub fn new(nmi: Arc<InterruptLine>, irq: Arc<InterruptLine>) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            pc: 0,
            p: FLAG_I | FLAG_U,
            nmi,
            irq,
            trace: false,
        }
    }

    pub fn enable_decode(&mut self) {
        self.trace = true;
    }

    #[must_use]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Load PC from the reset vector and restore power-on register state.
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFD;
        self.p = FLAG_I | FLAG_U;
        self.pc = self.read16(bus, RESET_VECTOR);
        self.nmi.clear();
    }

    /// Execute one instruction, honoring pending NMI/IRQ first.
    ///
    /// # Errors
    ///
    /// Returns [`CpuError::UnsupportedOpcode`] on undocumented opcodes.
    pub fn step(&mut self, bus: &mut impl Bus) -> Result<u16, CpuError> {
        if self.nmi.take() {
            return Ok(self.interrupt(bus, NMI_VECTOR));
        }
        if (self.irq.is_raised() || bus.poll_irq()) && self.p & FLAG_I == 0 {
            return Ok(self.interrupt(bus, IRQ_VECTOR));
        }

        let pc = self.pc;
        let opcode = self.fetch(bus);
        if self.trace {
            trace!(
                "${pc:04X}  {opcode:02X}  A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X}",
                self.a, self.x, self.y, self.p, self.sp
            );
        }
        self.execute(bus, opcode, pc)
    }

    fn interrupt(&mut self, bus: &mut impl Bus, vector: u16) -> u16 {
        self.push16(bus, self.pc);
        self.push(bus, (self.p | FLAG_U) & !FLAG_B);
        self.p |= FLAG_I;
        self.pc = self.read16(bus, vector);
        7
    }

    #[must_use]
    pub fn snapshot(&self) -> CpuState {
        CpuState {
            a: self.a,
            x: self.x,
            y: self.y,
            sp: self.sp,
            pc: self.pc,
            p: self.p,
            nmi_pending: self.nmi.is_raised(),
            irq_pending: self.irq.is_raised(),
        }
    }

    pub fn restore(&mut self, state: &CpuState) {
        self.a = state.a;
        self.x = state.x;
        self.y = state.y;
        self.sp = state.sp;
        self.pc = state.pc;
        self.p = state.p | FLAG_U;
        self.nmi.set(state.nmi_pending);
        self.irq.set(state.irq_pending);
    }

    // ------------------------------------------------------------------
    // Memory helpers
    // ------------------------------------------------------------------

    fn fetch(&mut self, bus: &mut impl Bus) -> u8 {
        let v = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        v
    }

    fn fetch16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = u16::from(self.fetch(bus));
        let hi = u16::from(self.fetch(bus));
        hi << 8 | lo
    }

    fn read16(&mut self, bus: &mut impl Bus, addr: u16) -> u16 {
        let lo = u16::from(bus.read(addr));
        let hi = u16::from(bus.read(addr.wrapping_add(1)));
        hi << 8 | lo
    }

    /// 16-bit read that wraps within the zero page (indirect modes).
    fn read16_zp(&mut self, bus: &mut impl Bus, addr: u8) -> u16 {
        let lo = u16::from(bus.read(u16::from(addr)));
        let hi = u16::from(bus.read(u16::from(addr.wrapping_add(1))));
        hi << 8 | lo
    }

    fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(0x0100 | u16::from(self.sp), value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn push16(&mut self, bus: &mut impl Bus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pop(&mut self, bus: &mut impl Bus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(0x0100 | u16::from(self.sp))
    }

    fn pop16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = u16::from(self.pop(bus));
        let hi = u16::from(self.pop(bus));
        hi << 8 | lo
    }

    // ------------------------------------------------------------------
    // Addressing modes
    // ------------------------------------------------------------------

    fn zp(&mut self, bus: &mut impl Bus) -> u16 {
        u16::from(self.fetch(bus))
    }

    fn zpx(&mut self, bus: &mut impl Bus) -> u16 {
        u16::from(self.fetch(bus).wrapping_add(self.x))
    }

    fn zpy(&mut self, bus: &mut impl Bus) -> u16 {
        u16::from(self.fetch(bus).wrapping_add(self.y))
    }

    fn abs(&mut self, bus: &mut impl Bus) -> u16 {
        self.fetch16(bus)
    }

    fn absx(&mut self, bus: &mut impl Bus) -> (u16, bool) {
        let base = self.fetch16(bus);
        let addr = base.wrapping_add(u16::from(self.x));
        (addr, (base ^ addr) & 0xFF00 != 0)
    }

    fn absy(&mut self, bus: &mut impl Bus) -> (u16, bool) {
        let base = self.fetch16(bus);
        let addr = base.wrapping_add(u16::from(self.y));
        (addr, (base ^ addr) & 0xFF00 != 0)
    }

    fn izx(&mut self, bus: &mut impl Bus) -> u16 {
        let zp = self.fetch(bus).wrapping_add(self.x);
        self.read16_zp(bus, zp)
    }

    fn izy(&mut self, bus: &mut impl Bus) -> (u16, bool) {
        let zp = self.fetch(bus);
        let base = self.read16_zp(bus, zp);
        let addr = base.wrapping_add(u16::from(self.y));
        (addr, (base ^ addr) & 0xFF00 != 0)
    }

    // ------------------------------------------------------------------
    // Flag and ALU helpers
    // ------------------------------------------------------------------

    fn set_flag(&mut self, flag: u8, set: bool) {
        if set {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
    }

    fn set_zn(&mut self, value: u8) {
        self.set_flag(FLAG_Z, value == 0);
        self.set_flag(FLAG_N, value & 0x80 != 0);
    }

    fn lda(&mut self, value: u8) {
        self.a = value;
        self.set_zn(value);
    }

    fn ldx(&mut self, value: u8) {
        self.x = value;
        self.set_zn(value);
    }

    fn ldy(&mut self, value: u8) {
        self.y = value;
        self.set_zn(value);
    }

    fn and(&mut self, value: u8) {
        self.lda(self.a & value);
    }

    fn ora(&mut self, value: u8) {
        self.lda(self.a | value);
    }

    fn eor(&mut self, value: u8) {
        self.lda(self.a ^ value);
    }

    // The 2A03 has no decimal mode: ADC/SBC are always binary.
    fn adc(&mut self, value: u8) {
        let sum = u16::from(self.a) + u16::from(value) + u16::from(self.p & FLAG_C);
        let result = sum as u8;
        self.set_flag(FLAG_C, sum > 0xFF);
        self.set_flag(FLAG_V, (self.a ^ result) & (value ^ result) & 0x80 != 0);
        self.lda(result);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(!value);
    }

    fn cmp(&mut self, reg: u8, value: u8) {
        self.set_flag(FLAG_C, reg >= value);
        self.set_zn(reg.wrapping_sub(value));
    }

    fn bit(&mut self, value: u8) {
        self.set_flag(FLAG_Z, self.a & value == 0);
        self.set_flag(FLAG_V, value & 0x40 != 0);
        self.set_flag(FLAG_N, value & 0x80 != 0);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_C, value & 0x80 != 0);
        let result = value << 1;
        self.set_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_C, value & 0x01 != 0);
        let result = value >> 1;
        self.set_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry = self.p & FLAG_C;
        self.set_flag(FLAG_C, value & 0x80 != 0);
        let result = value << 1 | carry;
        self.set_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry = (self.p & FLAG_C) << 7;
        self.set_flag(FLAG_C, value & 0x01 != 0);
        let result = value >> 1 | carry;
        self.set_zn(result);
        result
    }

    fn branch(&mut self, bus: &mut impl Bus, taken: bool) -> u16 {
        let offset = self.fetch(bus) as i8;
        if !taken {
            return 2;
        }
        let old = self.pc;
        self.pc = self.pc.wrapping_add(offset as u16);
        if (old ^ self.pc) & 0xFF00 != 0 { 4 } else { 3 }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, bus: &mut impl Bus, opcode: u8, pc: u16) -> Result<u16, CpuError> {
        let penalty = u16::from;
        let cycles = match opcode {
            // Loads
            0xA9 => { let v = self.fetch(bus); self.lda(v); 2 }
            0xA5 => { let a = self.zp(bus); let v = bus.read(a); self.lda(v); 3 }
            0xB5 => { let a = self.zpx(bus); let v = bus.read(a); self.lda(v); 4 }
            0xAD => { let a = self.abs(bus); let v = bus.read(a); self.lda(v); 4 }
            0xBD => { let (a, c) = self.absx(bus); let v = bus.read(a); self.lda(v); 4 + penalty(c) }
            0xB9 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.lda(v); 4 + penalty(c) }
            0xA1 => { let a = self.izx(bus); let v = bus.read(a); self.lda(v); 6 }
            0xB1 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.lda(v); 5 + penalty(c) }

            0xA2 => { let v = self.fetch(bus); self.ldx(v); 2 }
            0xA6 => { let a = self.zp(bus); let v = bus.read(a); self.ldx(v); 3 }
            0xB6 => { let a = self.zpy(bus); let v = bus.read(a); self.ldx(v); 4 }
            0xAE => { let a = self.abs(bus); let v = bus.read(a); self.ldx(v); 4 }
            0xBE => { let (a, c) = self.absy(bus); let v = bus.read(a); self.ldx(v); 4 + penalty(c) }

            0xA0 => { let v = self.fetch(bus); self.ldy(v); 2 }
            0xA4 => { let a = self.zp(bus); let v = bus.read(a); self.ldy(v); 3 }
            0xB4 => { let a = self.zpx(bus); let v = bus.read(a); self.ldy(v); 4 }
            0xAC => { let a = self.abs(bus); let v = bus.read(a); self.ldy(v); 4 }
            0xBC => { let (a, c) = self.absx(bus); let v = bus.read(a); self.ldy(v); 4 + penalty(c) }

            // Stores
            0x85 => { let a = self.zp(bus); bus.write(a, self.a); 3 }
            0x95 => { let a = self.zpx(bus); bus.write(a, self.a); 4 }
            0x8D => { let a = self.abs(bus); bus.write(a, self.a); 4 }
            0x9D => { let (a, _) = self.absx(bus); bus.write(a, self.a); 5 }
            0x99 => { let (a, _) = self.absy(bus); bus.write(a, self.a); 5 }
            0x81 => { let a = self.izx(bus); bus.write(a, self.a); 6 }
            0x91 => { let (a, _) = self.izy(bus); bus.write(a, self.a); 6 }

            0x86 => { let a = self.zp(bus); bus.write(a, self.x); 3 }
            0x96 => { let a = self.zpy(bus); bus.write(a, self.x); 4 }
            0x8E => { let a = self.abs(bus); bus.write(a, self.x); 4 }

            0x84 => { let a = self.zp(bus); bus.write(a, self.y); 3 }
            0x94 => { let a = self.zpx(bus); bus.write(a, self.y); 4 }
            0x8C => { let a = self.abs(bus); bus.write(a, self.y); 4 }

            // Transfers
            0xAA => { self.ldx(self.a); 2 }
            0xA8 => { self.ldy(self.a); 2 }
            0xBA => { self.ldx(self.sp); 2 }
            0x8A => { self.lda(self.x); 2 }
            0x98 => { self.lda(self.y); 2 }
            0x9A => { self.sp = self.x; 2 }

            // Stack
            0x48 => { self.push(bus, self.a); 3 }
            0x08 => { self.push(bus, self.p | FLAG_B | FLAG_U); 3 }
            0x68 => { let v = self.pop(bus); self.lda(v); 4 }
            0x28 => { self.p = (self.pop(bus) | FLAG_U) & !FLAG_B; 4 }

            // Logic
            0x29 => { let v = self.fetch(bus); self.and(v); 2 }
            0x25 => { let a = self.zp(bus); let v = bus.read(a); self.and(v); 3 }
            0x35 => { let a = self.zpx(bus); let v = bus.read(a); self.and(v); 4 }
            0x2D => { let a = self.abs(bus); let v = bus.read(a); self.and(v); 4 }
            0x3D => { let (a, c) = self.absx(bus); let v = bus.read(a); self.and(v); 4 + penalty(c) }
            0x39 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.and(v); 4 + penalty(c) }
            0x21 => { let a = self.izx(bus); let v = bus.read(a); self.and(v); 6 }
            0x31 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.and(v); 5 + penalty(c) }

            0x09 => { let v = self.fetch(bus); self.ora(v); 2 }
            0x05 => { let a = self.zp(bus); let v = bus.read(a); self.ora(v); 3 }
            0x15 => { let a = self.zpx(bus); let v = bus.read(a); self.ora(v); 4 }
            0x0D => { let a = self.abs(bus); let v = bus.read(a); self.ora(v); 4 }
            0x1D => { let (a, c) = self.absx(bus); let v = bus.read(a); self.ora(v); 4 + penalty(c) }
            0x19 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.ora(v); 4 + penalty(c) }
            0x01 => { let a = self.izx(bus); let v = bus.read(a); self.ora(v); 6 }
            0x11 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.ora(v); 5 + penalty(c) }

            0x49 => { let v = self.fetch(bus); self.eor(v); 2 }
            0x45 => { let a = self.zp(bus); let v = bus.read(a); self.eor(v); 3 }
            0x55 => { let a = self.zpx(bus); let v = bus.read(a); self.eor(v); 4 }
            0x4D => { let a = self.abs(bus); let v = bus.read(a); self.eor(v); 4 }
            0x5D => { let (a, c) = self.absx(bus); let v = bus.read(a); self.eor(v); 4 + penalty(c) }
            0x59 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.eor(v); 4 + penalty(c) }
            0x41 => { let a = self.izx(bus); let v = bus.read(a); self.eor(v); 6 }
            0x51 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.eor(v); 5 + penalty(c) }

            0x24 => { let a = self.zp(bus); let v = bus.read(a); self.bit(v); 3 }
            0x2C => { let a = self.abs(bus); let v = bus.read(a); self.bit(v); 4 }

            // Arithmetic
            0x69 => { let v = self.fetch(bus); self.adc(v); 2 }
            0x65 => { let a = self.zp(bus); let v = bus.read(a); self.adc(v); 3 }
            0x75 => { let a = self.zpx(bus); let v = bus.read(a); self.adc(v); 4 }
            0x6D => { let a = self.abs(bus); let v = bus.read(a); self.adc(v); 4 }
            0x7D => { let (a, c) = self.absx(bus); let v = bus.read(a); self.adc(v); 4 + penalty(c) }
            0x79 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.adc(v); 4 + penalty(c) }
            0x61 => { let a = self.izx(bus); let v = bus.read(a); self.adc(v); 6 }
            0x71 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.adc(v); 5 + penalty(c) }

            0xE9 => { let v = self.fetch(bus); self.sbc(v); 2 }
            0xE5 => { let a = self.zp(bus); let v = bus.read(a); self.sbc(v); 3 }
            0xF5 => { let a = self.zpx(bus); let v = bus.read(a); self.sbc(v); 4 }
            0xED => { let a = self.abs(bus); let v = bus.read(a); self.sbc(v); 4 }
            0xFD => { let (a, c) = self.absx(bus); let v = bus.read(a); self.sbc(v); 4 + penalty(c) }
            0xF9 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.sbc(v); 4 + penalty(c) }
            0xE1 => { let a = self.izx(bus); let v = bus.read(a); self.sbc(v); 6 }
            0xF1 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.sbc(v); 5 + penalty(c) }

            0xC9 => { let v = self.fetch(bus); self.cmp(self.a, v); 2 }
            0xC5 => { let a = self.zp(bus); let v = bus.read(a); self.cmp(self.a, v); 3 }
            0xD5 => { let a = self.zpx(bus); let v = bus.read(a); self.cmp(self.a, v); 4 }
            0xCD => { let a = self.abs(bus); let v = bus.read(a); self.cmp(self.a, v); 4 }
            0xDD => { let (a, c) = self.absx(bus); let v = bus.read(a); self.cmp(self.a, v); 4 + penalty(c) }
            0xD9 => { let (a, c) = self.absy(bus); let v = bus.read(a); self.cmp(self.a, v); 4 + penalty(c) }
            0xC1 => { let a = self.izx(bus); let v = bus.read(a); self.cmp(self.a, v); 6 }
            0xD1 => { let (a, c) = self.izy(bus); let v = bus.read(a); self.cmp(self.a, v); 5 + penalty(c) }

            0xE0 => { let v = self.fetch(bus); self.cmp(self.x, v); 2 }
            0xE4 => { let a = self.zp(bus); let v = bus.read(a); self.cmp(self.x, v); 3 }
            0xEC => { let a = self.abs(bus); let v = bus.read(a); self.cmp(self.x, v); 4 }

            0xC0 => { let v = self.fetch(bus); self.cmp(self.y, v); 2 }
            0xC4 => { let a = self.zp(bus); let v = bus.read(a); self.cmp(self.y, v); 3 }
            0xCC => { let a = self.abs(bus); let v = bus.read(a); self.cmp(self.y, v); 4 }

            // Increments / decrements
            0xE6 => { let a = self.zp(bus); let v = bus.read(a).wrapping_add(1); self.set_zn(v); bus.write(a, v); 5 }
            0xF6 => { let a = self.zpx(bus); let v = bus.read(a).wrapping_add(1); self.set_zn(v); bus.write(a, v); 6 }
            0xEE => { let a = self.abs(bus); let v = bus.read(a).wrapping_add(1); self.set_zn(v); bus.write(a, v); 6 }
            0xFE => { let (a, _) = self.absx(bus); let v = bus.read(a).wrapping_add(1); self.set_zn(v); bus.write(a, v); 7 }

            0xC6 => { let a = self.zp(bus); let v = bus.read(a).wrapping_sub(1); self.set_zn(v); bus.write(a, v); 5 }
            0xD6 => { let a = self.zpx(bus); let v = bus.read(a).wrapping_sub(1); self.set_zn(v); bus.write(a, v); 6 }
            0xCE => { let a = self.abs(bus); let v = bus.read(a).wrapping_sub(1); self.set_zn(v); bus.write(a, v); 6 }
            0xDE => { let (a, _) = self.absx(bus); let v = bus.read(a).wrapping_sub(1); self.set_zn(v); bus.write(a, v); 7 }

            0xE8 => { self.ldx(self.x.wrapping_add(1)); 2 }
            0xC8 => { self.ldy(self.y.wrapping_add(1)); 2 }
            0xCA => { self.ldx(self.x.wrapping_sub(1)); 2 }
            0x88 => { self.ldy(self.y.wrapping_sub(1)); 2 }

            // Shifts and rotates
            0x0A => { self.a = self.asl(self.a); 2 }
            0x06 => { let a = self.zp(bus); let v = bus.read(a); let v = self.asl(v); bus.write(a, v); 5 }
            0x16 => { let a = self.zpx(bus); let v = bus.read(a); let v = self.asl(v); bus.write(a, v); 6 }
            0x0E => { let a = self.abs(bus); let v = bus.read(a); let v = self.asl(v); bus.write(a, v); 6 }
            0x1E => { let (a, _) = self.absx(bus); let v = bus.read(a); let v = self.asl(v); bus.write(a, v); 7 }

            0x4A => { self.a = self.lsr(self.a); 2 }
            0x46 => { let a = self.zp(bus); let v = bus.read(a); let v = self.lsr(v); bus.write(a, v); 5 }
            0x56 => { let a = self.zpx(bus); let v = bus.read(a); let v = self.lsr(v); bus.write(a, v); 6 }
            0x4E => { let a = self.abs(bus); let v = bus.read(a); let v = self.lsr(v); bus.write(a, v); 6 }
            0x5E => { let (a, _) = self.absx(bus); let v = bus.read(a); let v = self.lsr(v); bus.write(a, v); 7 }

            0x2A => { self.a = self.rol(self.a); 2 }
            0x26 => { let a = self.zp(bus); let v = bus.read(a); let v = self.rol(v); bus.write(a, v); 5 }
            0x36 => { let a = self.zpx(bus); let v = bus.read(a); let v = self.rol(v); bus.write(a, v); 6 }
            0x2E => { let a = self.abs(bus); let v = bus.read(a); let v = self.rol(v); bus.write(a, v); 6 }
            0x3E => { let (a, _) = self.absx(bus); let v = bus.read(a); let v = self.rol(v); bus.write(a, v); 7 }

            0x6A => { self.a = self.ror(self.a); 2 }
            0x66 => { let a = self.zp(bus); let v = bus.read(a); let v = self.ror(v); bus.write(a, v); 5 }
            0x76 => { let a = self.zpx(bus); let v = bus.read(a); let v = self.ror(v); bus.write(a, v); 6 }
            0x6E => { let a = self.abs(bus); let v = bus.read(a); let v = self.ror(v); bus.write(a, v); 6 }
            0x7E => { let (a, _) = self.absx(bus); let v = bus.read(a); let v = self.ror(v); bus.write(a, v); 7 }

            // Jumps and subroutines
            0x4C => { self.pc = self.fetch16(bus); 3 }
            0x6C => {
                let ptr = self.fetch16(bus);
                // 6502 bug: the high byte read wraps within the page.
                let lo = u16::from(bus.read(ptr));
                let hi_addr = (ptr & 0xFF00) | u16::from((ptr as u8).wrapping_add(1));
                let hi = u16::from(bus.read(hi_addr));
                self.pc = hi << 8 | lo;
                5
            }
            0x20 => {
                let target = self.fetch16(bus);
                self.push16(bus, self.pc.wrapping_sub(1));
                self.pc = target;
                6
            }
            0x60 => { self.pc = self.pop16(bus).wrapping_add(1); 6 }
            0x40 => {
                self.p = (self.pop(bus) | FLAG_U) & !FLAG_B;
                self.pc = self.pop16(bus);
                6
            }
            0x00 => {
                self.pc = self.pc.wrapping_add(1);
                self.push16(bus, self.pc);
                self.push(bus, self.p | FLAG_B | FLAG_U);
                self.p |= FLAG_I;
                self.pc = self.read16(bus, IRQ_VECTOR);
                7
            }

            // Branches
            0x10 => self.branch(bus, self.p & FLAG_N == 0),
            0x30 => self.branch(bus, self.p & FLAG_N != 0),
            0x50 => self.branch(bus, self.p & FLAG_V == 0),
            0x70 => self.branch(bus, self.p & FLAG_V != 0),
            0x90 => self.branch(bus, self.p & FLAG_C == 0),
            0xB0 => self.branch(bus, self.p & FLAG_C != 0),
            0xD0 => self.branch(bus, self.p & FLAG_Z == 0),
            0xF0 => self.branch(bus, self.p & FLAG_Z != 0),

            // Flags
            0x18 => { self.set_flag(FLAG_C, false); 2 }
            0x38 => { self.set_flag(FLAG_C, true); 2 }
            0x58 => { self.set_flag(FLAG_I, false); 2 }
            0x78 => { self.set_flag(FLAG_I, true); 2 }
            0xB8 => { self.set_flag(FLAG_V, false); 2 }
            0xD8 => { self.set_flag(FLAG_D, false); 2 }
            0xF8 => { self.set_flag(FLAG_D, true); 2 }

            0xEA => 2, // NOP

            _ => return Err(CpuError::UnsupportedOpcode { opcode, pc }),
        };
        Ok(cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimpleBus;

    fn cpu_with(program: &[u8]) -> (Cpu, SimpleBus) {
        let mut bus = SimpleBus::new();
        bus.load(0x8000, program);
        bus.write(RESET_VECTOR, 0x00);
        bus.write(RESET_VECTOR + 1, 0x80);
        let mut cpu = Cpu::new(InterruptLine::new(), InterruptLine::new());
        cpu.reset(&mut bus);
        (cpu, bus)
    }

    #[test]
    fn lda_immediate_sets_flags() {
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x00, 0xA9, 0x80]);
        assert_eq!(cpu.step(&mut bus).unwrap(), 2);
        assert_ne!(cpu.p & FLAG_Z, 0);
        cpu.step(&mut bus).unwrap();
        assert_ne!(cpu.p & FLAG_N, 0);
        assert_eq!(cpu.a, 0x80);
    }

    #[test]
    fn absolute_x_page_cross_penalty() {
        // LDX #$01; LDA $80FF,X crosses into $8100.
        let (mut cpu, mut bus) = cpu_with(&[0xA2, 0x01, 0xBD, 0xFF, 0x80]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.step(&mut bus).unwrap(), 5);

        // LDA $8000,X stays within the page.
        let (mut cpu, mut bus) = cpu_with(&[0xA2, 0x01, 0xBD, 0x00, 0x80]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.step(&mut bus).unwrap(), 4);
    }

    #[test]
    fn sta_absolute_x_has_no_penalty() {
        let (mut cpu, mut bus) = cpu_with(&[0xA2, 0x01, 0x9D, 0xFF, 0x02]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.step(&mut bus).unwrap(), 5);
    }

    #[test]
    fn adc_overflow_and_carry() {
        // LDA #$7F; ADC #$01 -> $80, V set, C clear.
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x7F, 0x69, 0x01]);
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.a, 0x80);
        assert_ne!(cpu.p & FLAG_V, 0);
        assert_eq!(cpu.p & FLAG_C, 0);

        // LDA #$FF; SEC; ADC #$01 -> $01 with carry out.
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0xFF, 0x38, 0x69, 0x01]);
        for _ in 0..3 {
            cpu.step(&mut bus).unwrap();
        }
        assert_eq!(cpu.a, 0x01);
        assert_ne!(cpu.p & FLAG_C, 0);
    }

    #[test]
    fn sbc_borrows() {
        // SEC; LDA #$10; SBC #$01 -> $0F, carry still set.
        let (mut cpu, mut bus) = cpu_with(&[0x38, 0xA9, 0x10, 0xE9, 0x01]);
        for _ in 0..3 {
            cpu.step(&mut bus).unwrap();
        }
        assert_eq!(cpu.a, 0x0F);
        assert_ne!(cpu.p & FLAG_C, 0);
    }

    #[test]
    fn branch_cycle_counts() {
        // BNE not taken (Z set after LDA #0).
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x00, 0xD0, 0x10]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.step(&mut bus).unwrap(), 2);

        // BEQ taken, same page.
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x00, 0xF0, 0x10]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.step(&mut bus).unwrap(), 3);
        assert_eq!(cpu.pc, 0x8014);

        // BEQ taken across a page boundary.
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x00, 0xF0, 0xFA]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.step(&mut bus).unwrap(), 4);
    }

    #[test]
    fn jsr_rts_round_trip() {
        // JSR $8010; ... $8010: RTS
        let mut program = vec![0x20, 0x10, 0x80];
        program.resize(0x10, 0xEA);
        program.push(0x60);
        let (mut cpu, mut bus) = cpu_with(&program);

        assert_eq!(cpu.step(&mut bus).unwrap(), 6);
        assert_eq!(cpu.pc, 0x8010);
        assert_eq!(cpu.step(&mut bus).unwrap(), 6);
        assert_eq!(cpu.pc, 0x8003);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        let (mut cpu, mut bus) = cpu_with(&[0x6C, 0xFF, 0x02]);
        bus.write(0x02FF, 0x34);
        bus.write(0x0300, 0x99); // must NOT be used
        bus.write(0x0200, 0x12); // wrapped high byte
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn brk_takes_seven_cycles() {
        let (mut cpu, mut bus) = cpu_with(&[0x00]);
        bus.write(IRQ_VECTOR, 0x00);
        bus.write(IRQ_VECTOR + 1, 0x90);
        assert_eq!(cpu.step(&mut bus).unwrap(), 7);
        assert_eq!(cpu.pc, 0x9000);
        assert_ne!(cpu.p & FLAG_I, 0);
    }

    #[test]
    fn nmi_serviced_before_instruction() {
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x42]);
        bus.write(NMI_VECTOR, 0x00);
        bus.write(NMI_VECTOR + 1, 0xA0);

        cpu.nmi.raise();
        assert_eq!(cpu.step(&mut bus).unwrap(), 7);
        assert_eq!(cpu.pc, 0xA000);
        assert_eq!(cpu.a, 0); // LDA did not run
    }

    #[test]
    fn irq_masked_by_interrupt_disable() {
        let (mut cpu, mut bus) = cpu_with(&[0x58, 0xEA]); // CLI; NOP
        bus.write(IRQ_VECTOR, 0x00);
        bus.write(IRQ_VECTOR + 1, 0xB0);

        cpu.irq.raise();
        cpu.step(&mut bus).unwrap(); // CLI (I still set during this step)
        assert_eq!(cpu.step(&mut bus).unwrap(), 7);
        assert_eq!(cpu.pc, 0xB000);
    }

    #[test]
    fn rti_restores_flags_and_pc() {
        let (mut cpu, mut bus) = cpu_with(&[0x00, 0xEA, 0xEA]);
        bus.write(IRQ_VECTOR, 0x00);
        bus.write(IRQ_VECTOR + 1, 0x90);
        bus.load(0x9000, &[0x40]); // RTI

        cpu.step(&mut bus).unwrap(); // BRK
        cpu.step(&mut bus).unwrap(); // RTI
        assert_eq!(cpu.pc, 0x8002); // BRK pushes PC+2
    }

    #[test]
    fn unsupported_opcode_is_an_error() {
        let (mut cpu, mut bus) = cpu_with(&[0x02]);
        let err = cpu.step(&mut bus).unwrap_err();
        assert_eq!(
            err,
            CpuError::UnsupportedOpcode {
                opcode: 0x02,
                pc: 0x8000
            }
        );
    }

    #[test]
    fn snapshot_round_trip() {
        let (mut cpu, mut bus) = cpu_with(&[0xA9, 0x42, 0xAA, 0xE8]);
        for _ in 0..3 {
            cpu.step(&mut bus).unwrap();
        }

        let state = cpu.snapshot();
        let mut fresh = Cpu::new(InterruptLine::new(), InterruptLine::new());
        fresh.restore(&state);
        assert_eq!(fresh.snapshot(), state);
        assert_eq!(fresh.a, 0x42);
        assert_eq!(fresh.x, 0x43);
    }
}
