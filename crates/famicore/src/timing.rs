//! Region timing constants.
//!
//! The PPU-to-CPU clock ratio differs by region: NTSC runs the PPU at
//! exactly 3 PPU cycles per CPU cycle (crystal / 4 vs crystal / 12), PAL
//! at exactly 3.2 (crystal / 5 vs crystal / 16). Both are rationals with
//! denominator 5, so the scheduler's cycle quota can be kept as an exact
//! integer count of fifths of a PPU cycle.

use serde::{Deserialize, Serialize};

/// Video region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// NTSC: 60 Hz, 262 scanlines, 1,789,773 Hz CPU.
    #[default]
    Ntsc,
    /// PAL: 50 Hz, 312 scanlines, 1,662,607 Hz CPU.
    Pal,
}

impl Region {
    /// CPU frequency in Hz.
    #[must_use]
    pub const fn cpu_hz(self) -> u32 {
        match self {
            Self::Ntsc => 1_789_773,
            Self::Pal => 1_662_607,
        }
    }

    /// Total scanlines per frame, including post-render and vblank.
    #[must_use]
    pub const fn scanlines_per_frame(self) -> u16 {
        match self {
            Self::Ntsc => 262,
            Self::Pal => 312,
        }
    }

    /// Target frame rate for the limiter.
    #[must_use]
    pub const fn frame_rate(self) -> u32 {
        match self {
            Self::Ntsc => 60,
            Self::Pal => 50,
        }
    }

    /// PPU cycles owed per CPU cycle, as an exact rational.
    #[must_use]
    pub const fn clock_ratio(self) -> ClockRatio {
        match self {
            Self::Ntsc => ClockRatio { numer: 15, denom: 5 }, // 3.0
            Self::Pal => ClockRatio { numer: 16, denom: 5 },  // 3.2
        }
    }
}

/// Exact PPU-per-CPU cycle ratio.
///
/// The scheduler's quota is an integer in units of `1/denom` PPU cycles:
/// a CPU step of `n` cycles credits `n * numer`, one PPU step debits
/// `denom`. No fractional residue survives a whole number of PPU cycles,
/// so snapshots are deterministic across machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRatio {
    /// Quota units credited per CPU cycle.
    pub numer: u64,
    /// Quota units per PPU cycle.
    pub denom: u64,
}

impl ClockRatio {
    /// The ratio as a float, for display only.
    #[must_use]
    pub fn as_f32(self) -> f32 {
        self.numer as f32 / self.denom as f32
    }
}
