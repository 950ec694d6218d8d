//! The clock scheduler.
//!
//! Interleaves CPU instructions and PPU cycles at the region's exact
//! ratio. The quota is an integer in units of `1/denom` PPU cycles: a
//! CPU step of `n` cycles credits `n * numer`, each PPU step debits
//! `denom`. Between iterations the identity
//! `cpu_cycles * ratio == ppu_cycles + quota` holds exactly.
//!
//! Per iteration:
//! 1. If less than one PPU cycle is owed, run one CPU instruction and
//!    credit the quota.
//! 2. While at least one PPU cycle is owed, step the PPU; emit the frame
//!    event (and run the limiter) at frame boundaries; clock the mapper's
//!    scanline counter on the per-scanline edge; apply single-step
//!    pauses. A pause stops the drain immediately so step modes are
//!    cycle-exact.
//! 3. If a CPU step happened this iteration and the quota is drained,
//!    clock the APU once per executed CPU cycle and emit sample events.
//! 4. Poll the control channel; while paused, block on it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::console::Console;
use crate::error::CpuError;
use crate::events::{Event, EventSender, PauseCommand, PauseRequest};
use crate::fps::FrameLimiter;
use crate::snapshot;
use crate::timing::ClockRatio;

/// Engine run state. Only a quit transition exists; it is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Quitting,
}

/// Single-step granularity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepMode {
    #[default]
    NoStep,
    CycleStep,
    ScanlineStep,
    FrameStep,
}

/// Shared run-state flag. Every activity observes quitting at its next
/// checkpoint; nothing ever un-quits.
#[derive(Debug, Default)]
pub struct Shutdown {
    quitting: AtomicBool,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn quit(&self) {
        self.quitting.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        if self.is_quitting() {
            RunState::Quitting
        } else {
            RunState::Running
        }
    }
}

/// Commands the event consumer forwards to the scheduler. Delivered on
/// a dedicated channel so a paused scheduler (which blocks on this
/// channel only) still observes Quit.
#[derive(Debug)]
pub(crate) enum Control {
    Pause(PauseCommand),
    SetStepMode(StepMode),
    SaveState,
    LoadState,
    Reset,
    ShowFps,
    Quit,
}

/// Pause transition: Pause/Unpause force the state, Toggle flips it.
#[must_use]
pub fn apply_pause(request: PauseRequest, paused: bool) -> bool {
    match request {
        PauseRequest::Pause => true,
        PauseRequest::Unpause => false,
        PauseRequest::Toggle => !paused,
    }
}

pub(crate) struct Scheduler {
    pub(crate) console: Console,
    ratio: ClockRatio,
    quota: u64,
    step_mode: StepMode,
    paused: bool,
    limiter: FrameLimiter,
    events: EventSender,
    control: mpsc::Receiver<Control>,
    shutdown: Arc<Shutdown>,
    state_path: PathBuf,
}

impl Scheduler {
    pub(crate) fn new(
        console: Console,
        events: EventSender,
        control: mpsc::Receiver<Control>,
        shutdown: Arc<Shutdown>,
        state_path: PathBuf,
    ) -> Self {
        let region = console.region();
        Self {
            ratio: region.clock_ratio(),
            limiter: FrameLimiter::new(region.frame_rate()),
            console,
            quota: 0,
            step_mode: StepMode::NoStep,
            paused: false,
            events,
            control,
            shutdown,
            state_path,
        }
    }

    /// The scheduler activity: iterate until quitting, blocking on the
    /// control channel while paused.
    pub(crate) fn run(&mut self) -> Result<(), CpuError> {
        while !self.shutdown.is_quitting() {
            // While paused, the only suspension point is the control
            // channel: no CPU or PPU cycles advance, and a Quit delivered
            // here unblocks us.
            while self.paused && !self.shutdown.is_quitting() {
                match self.control.recv() {
                    Ok(command) => self.handle(command),
                    Err(_) => self.shutdown.quit(),
                }
            }
            if self.shutdown.is_quitting() {
                break;
            }
            if let Err(e) = self.iterate() {
                warn!("{e}");
                self.shutdown.quit();
                return Err(e);
            }
        }
        Ok(())
    }

    /// One scheduler iteration. Never blocks.
    pub(crate) fn iterate(&mut self) -> Result<(), CpuError> {
        let mut cycles = 0u16;
        let mut stepped = false;

        // CPU phase.
        if self.quota < self.ratio.denom {
            cycles = self.console.cpu_step()?;
            self.quota += u64::from(cycles) * self.ratio.numer;
            stepped = true;
        }

        // PPU phase.
        while self.quota >= self.ratio.denom {
            let scanline_before = self.console.scanline();

            if let Some(frame) = self.console.ppu_step() {
                let _ = self.events.send(Event::Frame(frame));
                self.limiter.frame_done();
                if self.step_mode == StepMode::FrameStep {
                    self.paused = true;
                    info!("paused at frame {}", self.console.ppu_frame());
                }
            }

            if self.console.has_scanline_hook() && self.console.scanline_trigger() {
                self.console.scanline_tick();
            }

            self.quota -= self.ratio.denom;

            match self.step_mode {
                StepMode::CycleStep => {
                    self.paused = true;
                    info!("paused at dot {}", self.console.ppu_dot());
                }
                StepMode::ScanlineStep if self.console.scanline() != scanline_before => {
                    self.paused = true;
                    info!("paused at scanline {}", self.console.scanline());
                }
                _ => {}
            }
            if self.paused {
                // Stop draining so step modes are cycle-exact; the
                // remaining quota is consumed after the next unpause.
                break;
            }
        }

        // APU sample drain: only against CPU cycles executed this
        // iteration, and only once the PPU has caught up to them.
        if stepped && self.quota < self.ratio.denom {
            for _ in 0..cycles {
                if let Some(sample) = self.console.apu_sample() {
                    let _ = self.events.send(Event::Sample(sample));
                }
            }
        }

        // Non-blocking control poll.
        match self.control.try_recv() {
            Ok(command) => self.handle(command),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.shutdown.quit(),
        }

        Ok(())
    }

    pub(crate) fn handle(&mut self, command: Control) {
        match command {
            Control::Pause(cmd) => {
                let was = self.paused;
                self.paused = apply_pause(cmd.request, was);
                if let Some(ack) = cmd.ack {
                    let _ = ack.send(self.paused != was);
                }
            }
            Control::SetStepMode(mode) => self.step_mode = mode,
            Control::SaveState => self.save_state(),
            Control::LoadState => self.load_state(),
            Control::Reset => {
                self.console.reset();
                self.quota = 0;
                info!("console reset");
            }
            Control::ShowFps => self.limiter.toggle_fps(),
            Control::Quit => self.shutdown.quit(),
        }
    }

    /// Snapshot errors are reported, never fatal.
    fn save_state(&mut self) {
        let snap = self.console.snapshot(self.quota, self.step_mode);
        match snapshot::save(&self.state_path, &snap) {
            Ok(()) => info!("saved state to {}", self.state_path.display()),
            Err(e) => warn!("error saving state: {e}"),
        }
    }

    /// A failed load leaves the engine exactly as it was.
    fn load_state(&mut self) {
        let snap = match snapshot::load(&self.state_path) {
            Ok(snap) => snap,
            Err(e) => {
                warn!("error loading state: {e}");
                return;
            }
        };
        match self.console.restore(&snap) {
            Ok((quota, step_mode)) => {
                self.quota = quota;
                self.step_mode = step_mode;
                info!("loaded state from {}", self.state_path.display());
            }
            Err(e) => warn!("error loading state: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{RomImage, test_rom};
    use crate::controller::InputLatches;

    struct Harness {
        scheduler: Scheduler,
        control: mpsc::Sender<Control>,
        events: mpsc::Receiver<Event>,
    }

    /// Build a scheduler around a small program. `name` controls the
    /// region ("x (E)" selects PAL).
    fn harness(name: &str, program: &[u8]) -> Harness {
        let data = test_rom::nrom_with_program(program);
        let rom = RomImage::from_bytes(name, &data).unwrap();
        let mut console = Console::new(rom, InputLatches::new()).unwrap();
        console.reset();

        let (events_tx, events_rx) = mpsc::channel();
        let (control_tx, control_rx) = mpsc::channel();
        let scheduler = Scheduler::new(
            console,
            events_tx,
            control_rx,
            Shutdown::new(),
            std::env::temp_dir().join(format!("famicore-sched-{}.nst", std::process::id())),
        );
        Harness {
            scheduler,
            control: control_tx,
            events: events_rx,
        }
    }

    #[test]
    fn ntsc_ratio_has_no_residue() {
        // BRK consumes exactly 7 cycles: 7 * 3.0 = 21 PPU cycles.
        let mut h = harness("s1", &[0x00]);
        let dot_before = h.scheduler.console.ppu_dot();
        h.scheduler.iterate().unwrap();
        assert_eq!(h.scheduler.quota, 0);
        assert_eq!(h.scheduler.console.ppu_dot() - dot_before, 21);
    }

    #[test]
    fn pal_ratio_has_no_residue() {
        // STA $0200,X consumes exactly 5 cycles: 5 * 3.2 = 16 PPU cycles.
        let mut h = harness("s2 (E)", &[0x9D, 0x00, 0x02]);
        assert_eq!(h.scheduler.ratio.as_f32(), 3.2);
        let dot_before = h.scheduler.console.ppu_dot();
        h.scheduler.iterate().unwrap();
        assert_eq!(h.scheduler.quota, 0);
        assert_eq!(h.scheduler.console.ppu_dot() - dot_before, 16);
    }

    #[test]
    fn cycle_accounting_holds_across_iterations() {
        // Rendering stays off so no odd-frame dot is skipped and elapsed
        // PPU cycles can be reconstructed from the position.
        let mut h = harness("inv", &[0xA9, 0x01, 0x69, 0x01, 0x4C, 0x02, 0x80]);
        let ratio = h.scheduler.ratio;
        for _ in 0..60_000 {
            h.scheduler.iterate().unwrap();
            // cpu_cycles * ratio == ppu_cycles + quota, exactly (epsilon
            // zero: everything is integer).
            let cpu = h.scheduler.console.cpu_cycles();
            let ppu = total_ppu_cycles(&h.scheduler.console);
            assert_eq!(cpu * ratio.numer, ppu * ratio.denom + h.scheduler.quota);
        }
        assert!(h.scheduler.console.ppu_frame() > 1); // crossed frames
    }

    /// Elapsed PPU cycles since power-on (pre-render line, dot 0),
    /// reconstructed from the (frame, scanline, dot) tuple. Frames
    /// advance on entry to scanline 241.
    fn total_ppu_cycles(console: &Console) -> u64 {
        let lines = u64::from(console.region().scanlines_per_frame());
        let frame = console.ppu_frame();
        let scanline = u64::from(console.scanline());
        let dot = u64::from(console.ppu_dot());
        if frame == 0 {
            // Line order: pre-render, then 0..=240.
            let idx = (scanline + 1) % lines;
            idx * 341 + dot
        } else {
            // Line order within a frame: 241..lines, then 0..=240.
            let idx = if scanline >= 241 {
                scanline - 241
            } else {
                lines - 241 + scanline
            };
            341 * 242 + (frame - 1) * lines * 341 + idx * 341 + dot
        }
    }

    #[test]
    fn cycle_step_executes_one_ppu_cycle_then_pauses() {
        let mut h = harness("step", &[0xEA, 0xEA, 0xEA, 0xEA]);
        h.control.send(Control::SetStepMode(StepMode::CycleStep)).unwrap();
        h.scheduler.iterate().unwrap(); // picks up the mode change
        let dot = h.scheduler.console.ppu_dot();

        h.scheduler.iterate().unwrap();
        assert!(h.scheduler.paused);
        assert_eq!(h.scheduler.console.ppu_dot(), dot + 1);

        // Unpause and step again: exactly one more PPU cycle.
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Unpause)));
        h.scheduler.iterate().unwrap();
        assert!(h.scheduler.paused);
        assert_eq!(h.scheduler.console.ppu_dot(), dot + 2);
    }

    #[test]
    fn scanline_step_pauses_exactly_on_the_scanline_change() {
        let mut h = harness("step", &[0xEA; 16]);
        h.scheduler.handle(Control::SetStepMode(StepMode::ScanlineStep));
        let start = h.scheduler.console.scanline();

        while !h.scheduler.paused {
            h.scheduler.iterate().unwrap();
        }
        // Paused on the first dot of the next scanline, not later.
        assert_ne!(h.scheduler.console.scanline(), start);
        assert_eq!(h.scheduler.console.ppu_dot(), 0);
    }

    #[test]
    fn frame_step_pauses_after_the_frame_event() {
        let mut h = harness("step", &[0xEA; 16]);
        h.scheduler.handle(Control::SetStepMode(StepMode::FrameStep));

        while !h.scheduler.paused {
            h.scheduler.iterate().unwrap();
        }
        let frame_event = h
            .events
            .try_iter()
            .any(|e| matches!(e, Event::Frame(_)));
        assert!(frame_event);
        assert_eq!(h.scheduler.console.ppu_frame(), 1);
        assert_eq!((h.scheduler.console.scanline(), h.scheduler.console.ppu_dot()), (241, 0));
    }

    #[test]
    fn pause_transitions_follow_the_table() {
        let mut h = harness("pause", &[0xEA]);
        assert!(!h.scheduler.paused);

        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Pause)));
        assert!(h.scheduler.paused);
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Pause)));
        assert!(h.scheduler.paused);
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Toggle)));
        assert!(!h.scheduler.paused);
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Toggle)));
        assert!(h.scheduler.paused);
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Unpause)));
        assert!(!h.scheduler.paused);
    }

    #[test]
    fn pause_ack_reports_whether_state_changed() {
        let mut h = harness("ack", &[0xEA]);
        let (ack_tx, ack_rx) = mpsc::channel();
        h.scheduler.handle(Control::Pause(PauseCommand::with_ack(
            PauseRequest::Pause,
            ack_tx.clone(),
        )));
        assert!(ack_rx.recv().unwrap()); // changed

        h.scheduler.handle(Control::Pause(PauseCommand::with_ack(
            PauseRequest::Pause,
            ack_tx,
        )));
        assert!(!ack_rx.recv().unwrap()); // already paused
    }

    #[test]
    fn paused_scheduler_advances_nothing() {
        let mut h = harness("frozen", &[0xEA; 4]);
        h.scheduler.iterate().unwrap();
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Pause)));

        let quota = h.scheduler.quota;
        let dot = h.scheduler.console.ppu_dot();
        let cycles = h.scheduler.console.cpu_cycles();

        // run() blocks on the control channel while paused; deliver a
        // quit so it returns, and verify nothing moved in between.
        h.control.send(Control::Quit).unwrap();
        h.scheduler.run().unwrap();

        assert_eq!(h.scheduler.quota, quota);
        assert_eq!(h.scheduler.console.ppu_dot(), dot);
        assert_eq!(h.scheduler.console.cpu_cycles(), cycles);
    }

    #[test]
    fn quit_while_paused_unblocks_the_scheduler() {
        let mut h = harness("s6", &[0xEA; 4]);
        h.scheduler.handle(Control::Pause(PauseCommand::new(PauseRequest::Pause)));

        let control = h.control.clone();
        let handle = std::thread::spawn(move || {
            control.send(Control::Quit).unwrap();
        });
        // run() must observe Quitting via the pause channel and return.
        h.scheduler.run().unwrap();
        handle.join().unwrap();
        assert!(h.scheduler.shutdown.is_quitting());
    }

    #[test]
    fn fatal_cpu_error_quits() {
        // $02 is an undocumented opcode.
        let mut h = harness("halt", &[0x02]);
        let err = h.scheduler.run().unwrap_err();
        assert!(matches!(err, CpuError::UnsupportedOpcode { opcode: 0x02, .. }));
        assert!(h.scheduler.shutdown.is_quitting());
    }

    #[test]
    fn samples_flow_only_after_cpu_steps() {
        let mut h = harness("audio", &[0xEA; 8]);
        // ~1/60th of a second of iterations produces frame-rate-ish
        // sample counts (44100 / 60 ≈ 735).
        for _ in 0..30_000 {
            h.scheduler.iterate().unwrap();
        }
        let samples = h
            .events
            .try_iter()
            .filter(|e| matches!(e, Event::Sample(_)))
            .count();
        assert!(samples > 0);
    }

    #[test]
    fn save_and_load_resume_identical_frames() {
        let program = [0xA9, 0x1E, 0x8D, 0x01, 0x20, 0x4C, 0x05, 0x80];
        // Enable rendering so frames have content: LDA #$1E; STA $2001;
        // spin.
        let mut h = harness("resume", &program);
        let path = std::env::temp_dir().join(format!(
            "famicore-resume-{}.nst",
            std::process::id()
        ));
        h.scheduler.state_path = path.clone();

        // Run a while (to a sub-frame boundary), save, then capture the
        // next frame.
        for _ in 0..200_000 {
            h.scheduler.iterate().unwrap();
        }
        h.scheduler.handle(Control::SaveState);
        for _ in h.events.try_iter() {} // discard pre-save events
        let reference = next_frame(&mut h);

        // Fresh engine, load, and the next frame must match bit for bit.
        let mut h2 = harness("resume", &program);
        h2.scheduler.state_path = path.clone();
        h2.scheduler.handle(Control::LoadState);
        let resumed = next_frame(&mut h2);
        std::fs::remove_file(&path).ok();

        assert_eq!(reference, resumed);
        // Both engines are at the same machine state afterwards.
        let a = h.scheduler.console.snapshot(h.scheduler.quota, h.scheduler.step_mode);
        let b = h2.scheduler.console.snapshot(h2.scheduler.quota, h2.scheduler.step_mode);
        assert_eq!(a.cpu, b.cpu);
        assert_eq!(a.total_cycles, b.total_cycles);
        assert_eq!(a.ppu.v, b.ppu.v);
        assert_eq!(a.ppu_quota, b.ppu_quota);
    }

    fn next_frame(h: &mut Harness) -> Vec<u8> {
        loop {
            h.scheduler.iterate().unwrap();
            for event in h.events.try_iter() {
                if let Event::Frame(frame) = event {
                    return frame;
                }
            }
        }
    }

    #[test]
    fn failed_load_leaves_state_untouched() {
        let mut h = harness("badload", &[0xEA; 4]);
        let path = std::env::temp_dir().join(format!(
            "famicore-badload-{}.nst",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"meta":{"Version":"9.9"},"state":null}"#).unwrap();
        h.scheduler.state_path = path.clone();

        for _ in 0..100 {
            h.scheduler.iterate().unwrap();
        }
        let before = h.scheduler.console.snapshot(h.scheduler.quota, h.scheduler.step_mode);
        h.scheduler.handle(Control::LoadState);
        let after = h.scheduler.console.snapshot(h.scheduler.quota, h.scheduler.step_mode);
        std::fs::remove_file(&path).ok();

        assert_eq!(before.cpu, after.cpu);
        assert_eq!(before.ram, after.ram);
        assert_eq!(before.ppu.dot, after.ppu.dot);
    }
}
