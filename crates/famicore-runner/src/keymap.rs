//! Host input bindings.
//!
//! Joypad bindings live in data tables so a rebind scheme only has to
//! swap the table, not the lookup. Control keys carry engine actions.

use famicore::{Button, Event, PauseCommand, PauseRequest, StepMode};
use gilrs::Button as PadButton;
use winit::keyboard::KeyCode;

/// Keyboard bindings for joypad port 1. Later entries are alternates
/// for the same button (left hand on ZX, right hand on AS).
const KEY_BINDINGS: &[(KeyCode, Button)] = &[
    (KeyCode::ArrowUp, Button::Up),
    (KeyCode::ArrowDown, Button::Down),
    (KeyCode::ArrowLeft, Button::Left),
    (KeyCode::ArrowRight, Button::Right),
    (KeyCode::KeyZ, Button::A),
    (KeyCode::KeyX, Button::B),
    (KeyCode::KeyA, Button::A),
    (KeyCode::KeyS, Button::B),
    (KeyCode::Enter, Button::Start),
    (KeyCode::ShiftRight, Button::Select),
];

/// Gamepad bindings for joypad port 1. The two right-hand button pairs
/// both act as A/B so any grip works.
const PAD_BINDINGS: &[(PadButton, Button)] = &[
    (PadButton::DPadUp, Button::Up),
    (PadButton::DPadDown, Button::Down),
    (PadButton::DPadLeft, Button::Left),
    (PadButton::DPadRight, Button::Right),
    (PadButton::South, Button::A),
    (PadButton::East, Button::A),
    (PadButton::West, Button::B),
    (PadButton::North, Button::B),
    (PadButton::Start, Button::Start),
    (PadButton::Select, Button::Select),
];

fn lookup<K: PartialEq + Copy>(bindings: &[(K, Button)], key: K) -> Option<Button> {
    bindings
        .iter()
        .find(|(bound, _)| *bound == key)
        .map(|&(_, button)| button)
}

/// Map a host key to a joypad button.
#[must_use]
pub fn joypad_button(key: KeyCode) -> Option<Button> {
    lookup(KEY_BINDINGS, key)
}

/// Map a gamepad button to a joypad button.
#[must_use]
pub fn gamepad_button(button: PadButton) -> Option<Button> {
    lookup(PAD_BINDINGS, button)
}

/// Map a control key press to engine events, in the order they should
/// be posted.
#[must_use]
pub fn control_events(key: KeyCode) -> Vec<Event> {
    match key {
        KeyCode::KeyP => vec![Event::Pause(PauseCommand::new(PauseRequest::Toggle))],
        KeyCode::KeyR => vec![Event::Reset],
        KeyCode::F3 => vec![Event::ShowFps],
        KeyCode::F5 => vec![Event::SaveState],
        KeyCode::F7 => vec![Event::LoadState],
        // Frame advance: arm frame stepping, then let the scheduler run
        // until the next frame boundary pauses it again.
        KeyCode::KeyN => vec![
            Event::SetStepMode(StepMode::FrameStep),
            Event::Pause(PauseCommand::new(PauseRequest::Unpause)),
        ],
        // Back to free running.
        KeyCode::Digit0 => vec![
            Event::SetStepMode(StepMode::NoStep),
            Event::Pause(PauseCommand::new(PauseRequest::Unpause)),
        ],
        _ => Vec::new(),
    }
}
