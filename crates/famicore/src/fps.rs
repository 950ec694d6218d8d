//! Frame pacing.

use std::time::{Duration, Instant};

use log::info;

/// Sleeps the scheduler to the region's target frame rate and optionally
/// logs the measured rate once per second.
pub struct FrameLimiter {
    target: Duration,
    last_frame: Instant,
    show_fps: bool,
    frames: u32,
    window_start: Instant,
}

impl FrameLimiter {
    #[must_use]
    pub fn new(frame_rate: u32) -> Self {
        let now = Instant::now();
        Self {
            target: Duration::from_secs(1) / frame_rate,
            last_frame: now,
            show_fps: false,
            frames: 0,
            window_start: now,
        }
    }

    /// Toggle the once-per-second FPS log line.
    pub fn toggle_fps(&mut self) {
        self.show_fps = !self.show_fps;
        self.frames = 0;
        self.window_start = Instant::now();
    }

    /// Called once per completed frame: sleep off the remainder of the
    /// frame budget.
    pub fn frame_done(&mut self) {
        let elapsed = self.last_frame.elapsed();
        if elapsed < self.target {
            std::thread::sleep(self.target - elapsed);
        }
        self.last_frame = Instant::now();

        if self.show_fps {
            self.frames += 1;
            let window = self.window_start.elapsed();
            if window >= Duration::from_secs(1) {
                info!("{:.1} fps", f64::from(self.frames) / window.as_secs_f64());
                self.frames = 0;
                self.window_start = Instant::now();
            }
        }
    }
}
