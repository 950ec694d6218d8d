//! Engine lifecycle: construction, run, teardown.
//!
//! `Run` wires four concurrent activities together:
//! - the scheduler thread (hot loop, owns the console),
//! - the event-consumer thread (drains the event bus in order),
//! - optional recorder threads,
//! - the video sink, which stays on the calling thread.
//!
//! Teardown is cooperative: a Quit event flips the shared shutdown flag
//! and posts a Quit command to the scheduler's control channel, so every
//! activity observes Quitting at its next checkpoint, including a
//! scheduler blocked on the pause channel. Battery-backed save RAM is
//! written by the scheduler thread on its way out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use log::{info, warn};

use crate::cartridge::RomImage;
use crate::console::Console;
use crate::controller::InputLatches;
use crate::error::EngineError;
use crate::events::{Event, EventSender};
use crate::ppu::FrameBuffer;
use crate::scheduler::{Control, Scheduler, Shutdown};
use crate::sink::{AudioRecorder, AudioSink, FrameRecorder, VideoSink};
use crate::timing::Region;

/// Core engine options.
#[derive(Debug, Default, Clone)]
pub struct Options {
    /// Trace instruction decode via `log::trace!`.
    pub cpu_decode: bool,
    /// Force a region instead of detecting it from the ROM.
    pub region: Option<Region>,
}

/// The engine: a wired console plus the event bus and shutdown plumbing.
pub struct Nes {
    console: Console,
    latches: Arc<InputLatches>,
    shutdown: Arc<Shutdown>,
    events_tx: EventSender,
    events_rx: Receiver<Event>,
}

impl Nes {
    /// Load a ROM file and wire the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the ROM cannot be loaded or the bus
    /// cannot be wired.
    pub fn from_file(path: &Path, options: &Options) -> Result<Self, EngineError> {
        let rom = RomImage::from_file(path).map_err(EngineError::Rom)?;
        Self::from_image(rom, options)
    }

    /// Wire the engine around an already-parsed ROM image.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for unsupported mappers or bus conflicts.
    pub fn from_image(mut rom: RomImage, options: &Options) -> Result<Self, EngineError> {
        if let Some(region) = options.region {
            rom.region = region;
        }
        let latches = InputLatches::new();
        let mut console = Console::new(rom, latches.clone())?;
        if options.cpu_decode {
            console.enable_decode();
        }

        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            console,
            latches,
            shutdown: Shutdown::new(),
            events_tx,
            events_rx,
        })
    }

    #[must_use]
    pub fn game_name(&self) -> &str {
        self.console.game_name()
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.console.region()
    }

    /// A producer handle onto the event bus. Clone freely.
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// The shared run-state flag.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Run the engine to completion.
    ///
    /// Blocks on the video sink; when it returns (window closed or
    /// quit), the remaining activities are quiesced, battery RAM is
    /// saved, and any fatal scheduler error is propagated.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cpu`] when emulation halted on a fatal CPU
    /// error.
    pub fn run(
        self,
        video: &mut dyn VideoSink,
        audio: Box<dyn AudioSink>,
        recorder: Option<Box<dyn FrameRecorder>>,
        audio_recorder: Option<Box<dyn AudioRecorder>>,
    ) -> Result<(), EngineError> {
        let Self {
            mut console,
            latches,
            shutdown,
            events_tx,
            events_rx,
        } = self;

        info!("running {} ({:?})", console.game_name(), console.region());
        console.load_battery();
        console.reset();

        let (control_tx, control_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::channel();
        let state_path = PathBuf::from(format!("{}.nst", console.game_name()));

        // Scheduler activity. Owns the console; saves battery RAM on the
        // way out so the write happens on the thread that owns the state.
        let scheduler_shutdown = shutdown.clone();
        let scheduler_events = events_tx.clone();
        let scheduler_handle = thread::spawn(move || {
            let mut scheduler = Scheduler::new(
                console,
                scheduler_events,
                control_rx,
                scheduler_shutdown,
                state_path,
            );
            let result = scheduler.run();
            scheduler.console.save_battery();
            result
        });

        // Recorder activities.
        let (recorder_tx, recorder_handle) = recorder.map_or((None, None), |rec| {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(spawn_frame_recorder(rec, rx)))
        });
        let (audio_rec_tx, audio_rec_handle) = audio_recorder.map_or((None, None), |rec| {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(spawn_audio_recorder(rec, rx)))
        });

        // Event-consumer activity.
        let consumer_shutdown = shutdown.clone();
        let consumer_latches = latches;
        let consumer_handle = thread::spawn(move || {
            consume_events(
                &events_rx,
                &control_tx,
                &frame_tx,
                audio,
                &consumer_latches,
                recorder_tx,
                audio_rec_tx,
                &consumer_shutdown,
            );
        });

        // The video sink owns the window and must not migrate off this
        // thread. Run() blocks here until it exits.
        video.run(frame_rx, events_tx.clone(), shutdown.clone());

        // Video sink gone: make sure everything else winds down even if
        // no Quit event was posted.
        let _ = events_tx.send(Event::Quit);
        shutdown.quit();
        drop(events_tx);

        let _ = consumer_handle.join();
        if let Some(handle) = recorder_handle {
            let _ = handle.join();
        }
        if let Some(handle) = audio_rec_handle {
            let _ = handle.join();
        }

        match scheduler_handle.join() {
            Ok(result) => result.map_err(EngineError::Cpu),
            Err(_) => Ok(()),
        }
    }
}

/// The event-consumer loop: one event at a time, in arrival order.
#[allow(clippy::too_many_arguments)]
fn consume_events(
    events: &Receiver<Event>,
    control: &Sender<Control>,
    frames: &Sender<FrameBuffer>,
    mut audio: Box<dyn AudioSink>,
    latches: &InputLatches,
    recorder_tx: Option<Sender<FrameBuffer>>,
    audio_rec_tx: Option<Sender<i16>>,
    shutdown: &Shutdown,
) {
    while let Ok(event) = events.recv() {
        match event {
            Event::Frame(frame) => {
                if let Some(tx) = &recorder_tx {
                    let _ = tx.send(frame.clone());
                }
                let _ = frames.send(frame);
            }
            Event::Sample(sample) => {
                audio.push_sample(sample);
                if let Some(tx) = &audio_rec_tx {
                    let _ = tx.send(sample);
                }
            }
            Event::Input {
                port,
                button,
                pressed,
            } => latches.set_button(port, button, pressed),
            Event::Pause(cmd) => {
                let _ = control.send(Control::Pause(cmd));
            }
            Event::SetStepMode(mode) => {
                let _ = control.send(Control::SetStepMode(mode));
            }
            Event::SaveState => {
                let _ = control.send(Control::SaveState);
            }
            Event::LoadState => {
                let _ = control.send(Control::LoadState);
            }
            Event::Reset => {
                let _ = control.send(Control::Reset);
            }
            Event::ShowFps => {
                let _ = control.send(Control::ShowFps);
            }
            Event::Quit => {
                shutdown.quit();
                // Delivered on the control channel so a paused scheduler
                // unblocks and observes Quitting.
                let _ = control.send(Control::Quit);
                break;
            }
        }
    }
}

fn spawn_frame_recorder(
    mut recorder: Box<dyn FrameRecorder>,
    frames: Receiver<FrameBuffer>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(frame) = frames.recv() {
            if let Err(e) = recorder.record_frame(&frame) {
                warn!("frame recorder: {e}");
            }
        }
        if let Err(e) = recorder.finish() {
            warn!("frame recorder: {e}");
        }
    })
}

fn spawn_audio_recorder(
    mut recorder: Box<dyn AudioRecorder>,
    samples: Receiver<i16>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(sample) = samples.recv() {
            recorder.record_sample(sample);
        }
        if let Err(e) = recorder.finish() {
            warn!("audio recorder: {e}");
        }
    })
}
