//! The event bus.
//!
//! A single multi-producer channel feeds one consumer. Producers are the
//! scheduler (frames, samples), the video sink (input, control keys) and
//! anything else holding an [`EventSender`]. The consumer processes
//! events strictly in arrival order: it routes frames and samples to the
//! sinks and recorders, applies input to the controller latches, and
//! translates control events into scheduler commands.

use std::sync::mpsc;

use crate::controller::{Button, Port};
use crate::ppu::FrameBuffer;
use crate::scheduler::StepMode;

/// Pause request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseRequest {
    Toggle,
    Pause,
    Unpause,
}

/// A pause request with an optional single-shot acknowledgement channel.
/// The ack receives whether the paused state actually changed.
#[derive(Debug)]
pub struct PauseCommand {
    pub request: PauseRequest,
    pub ack: Option<mpsc::Sender<bool>>,
}

impl PauseCommand {
    #[must_use]
    pub fn new(request: PauseRequest) -> Self {
        Self { request, ack: None }
    }

    #[must_use]
    pub fn with_ack(request: PauseRequest, ack: mpsc::Sender<bool>) -> Self {
        Self {
            request,
            ack: Some(ack),
        }
    }
}

/// Everything that can travel on the event bus.
#[derive(Debug)]
pub enum Event {
    /// A completed frame from the scheduler.
    Frame(FrameBuffer),
    /// One audio sample from the APU.
    Sample(i16),
    /// A button transition on a controller port.
    Input {
        port: Port,
        button: Button,
        pressed: bool,
    },
    /// Pause/unpause/toggle the scheduler.
    Pause(PauseCommand),
    /// Change the single-step granularity.
    SetStepMode(StepMode),
    /// Write the save state archive.
    SaveState,
    /// Load the save state archive.
    LoadState,
    /// Power-cycle the console.
    Reset,
    /// Toggle the FPS log line.
    ShowFps,
    /// Stop everything.
    Quit,
}

/// Producer handle to the event bus.
pub type EventSender = mpsc::Sender<Event>;
