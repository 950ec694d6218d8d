//! Output sinks and recorders.
//!
//! The engine core knows nothing about windows, audio devices or file
//! formats; it hands frames and samples to these traits. The video sink
//! is special: it owns the windowing context and must run on the thread
//! that calls [`Nes::run`](crate::Nes::run) (a hard platform
//! requirement on macOS and others).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::events::EventSender;
use crate::ppu::FrameBuffer;
use crate::scheduler::Shutdown;

/// The display. Receives completed frames and posts input/control
/// events back onto the event bus. `run` blocks until the user closes
/// the window or `shutdown` reports quitting.
pub trait VideoSink {
    fn run(&mut self, frames: Receiver<FrameBuffer>, events: EventSender, shutdown: Arc<Shutdown>);
}

/// The audio device. Fed one 16-bit sample at a time by the event
/// consumer; implementations buffer as they see fit.
pub trait AudioSink: Send {
    fn push_sample(&mut self, sample: i16);
}

/// Frame recorder backend. Runs on its own thread; a failed frame is
/// logged by the caller and does not halt emulation.
pub trait FrameRecorder: Send {
    /// Record one frame of palette indices.
    ///
    /// # Errors
    ///
    /// I/O or encoding failure for this frame only.
    fn record_frame(&mut self, frame: &FrameBuffer) -> std::io::Result<()>;

    /// Flush any buffered output at shutdown.
    ///
    /// # Errors
    ///
    /// I/O failure while finalizing.
    fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Audio recorder backend.
pub trait AudioRecorder: Send {
    fn record_sample(&mut self, sample: i16);

    /// Write out the recording at shutdown.
    ///
    /// # Errors
    ///
    /// I/O failure while finalizing.
    fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Audio sink that discards everything (headless runs, tests).
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn push_sample(&mut self, _sample: i16) {}
}
