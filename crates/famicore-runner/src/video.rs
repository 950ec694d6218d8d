//! Video sinks.
//!
//! [`WinitVideo`] owns the window and GPU surface and must run on the
//! main thread; it receives frames from the engine over a channel and
//! posts input/control events back. [`HeadlessVideo`] consumes a fixed
//! number of frames without a window, optionally saving the last one as
//! a screenshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use gilrs::{EventType, Gilrs};
use log::warn;
use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use famicore::sink::VideoSink;
use famicore::{Event, EventSender, FB_HEIGHT, FB_WIDTH, FrameBuffer, Port, Shutdown};

use crate::keymap;
use crate::palette;

/// Windowed video sink (winit + pixels).
pub struct WinitVideo {
    title: String,
    scale: u32,
}

impl WinitVideo {
    #[must_use]
    pub fn new(title: String, scale: u32) -> Self {
        Self {
            title,
            scale: scale.max(1),
        }
    }
}

impl VideoSink for WinitVideo {
    fn run(
        &mut self,
        frames: Receiver<FrameBuffer>,
        events: EventSender,
        shutdown: Arc<Shutdown>,
    ) {
        let event_loop = match EventLoop::new() {
            Ok(el) => el,
            Err(e) => {
                warn!("failed to create event loop: {e}");
                return;
            }
        };
        event_loop.set_control_flow(ControlFlow::Poll);

        let gilrs = Gilrs::new().ok();
        let mut app = App {
            frames,
            events,
            shutdown,
            title: self.title.clone(),
            scale: self.scale,
            window: None,
            pixels: None,
            gilrs,
        };
        if let Err(e) = event_loop.run_app(&mut app) {
            warn!("event loop error: {e}");
        }
    }
}

struct App {
    frames: Receiver<FrameBuffer>,
    events: EventSender,
    shutdown: Arc<Shutdown>,
    title: String,
    scale: u32,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    gilrs: Option<Gilrs>,
}

impl App {
    fn handle_key(&mut self, key: KeyCode, pressed: bool) {
        if let Some(button) = keymap::joypad_button(key) {
            let _ = self.events.send(Event::Input {
                port: Port::One,
                button,
                pressed,
            });
            return;
        }
        if pressed {
            for event in keymap::control_events(key) {
                let _ = self.events.send(event);
            }
        }
    }

    fn poll_gamepad(&mut self) {
        let Some(gilrs) = &mut self.gilrs else {
            return;
        };
        while let Some(event) = gilrs.next_event() {
            let (button, pressed) = match event.event {
                EventType::ButtonPressed(b, _) => (b, true),
                EventType::ButtonReleased(b, _) => (b, false),
                _ => continue,
            };
            if let Some(button) = keymap::gamepad_button(button) {
                let _ = self.events.send(Event::Input {
                    port: Port::One,
                    button,
                    pressed,
                });
            }
        }
    }

    /// Paint the most recent frame, if any arrived.
    fn paint_latest(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };
        let mut latest = None;
        for frame in self.frames.try_iter() {
            latest = Some(frame);
        }
        if let Some(frame) = latest {
            palette::fill_rgba(&frame, pixels.frame_mut());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let size = LogicalSize::new(
            FB_WIDTH as u32 * self.scale,
            FB_HEIGHT as u32 * self.scale,
        );
        let attrs = WindowAttributes::default()
            .with_title(&self.title)
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // The surface borrows the window for the rest of the
                // process; leak it to get the 'static lifetime.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH as u32, FB_HEIGHT as u32, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        warn!("failed to create pixel surface: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                warn!("failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                let _ = self.events.send(Event::Quit);
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if key == KeyCode::Escape && event.state == ElementState::Pressed {
                        let _ = self.events.send(Event::Quit);
                        event_loop.exit();
                        return;
                    }
                    if !event.repeat {
                        self.handle_key(key, event.state == ElementState::Pressed);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                self.paint_latest();
                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        warn!("render error: {e}");
                        let _ = self.events.send(Event::Quit);
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.shutdown.is_quitting() {
            event_loop.exit();
            return;
        }
        self.poll_gamepad();
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

/// Headless sink: consume `frames` frame events, optionally save the
/// last one, then quit.
pub struct HeadlessVideo {
    frames_wanted: u32,
    screenshot: Option<PathBuf>,
}

impl HeadlessVideo {
    #[must_use]
    pub fn new(frames_wanted: u32, screenshot: Option<PathBuf>) -> Self {
        Self {
            frames_wanted,
            screenshot,
        }
    }
}

impl VideoSink for HeadlessVideo {
    fn run(
        &mut self,
        frames: Receiver<FrameBuffer>,
        events: EventSender,
        shutdown: Arc<Shutdown>,
    ) {
        let mut seen = 0u32;
        let mut last = None;
        while seen < self.frames_wanted && !shutdown.is_quitting() {
            match frames.recv_timeout(Duration::from_secs(5)) {
                Ok(frame) => {
                    seen += 1;
                    last = Some(frame);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let (Some(path), Some(frame)) = (&self.screenshot, &last) {
            match crate::recorder::write_png(path, frame) {
                Ok(()) => log::info!("screenshot saved to {}", path.display()),
                Err(e) => warn!("screenshot failed: {e}"),
            }
        }
        let _ = events.send(Event::Quit);
    }
}
