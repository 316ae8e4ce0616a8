use std::time::{Duration, Instant};

/// Timing of one frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,
    pub now: Instant,
    pub frame_index: u64,
}

/// Frame-rate summary over the clock's averaging window.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameStats {
    pub frames: u32,
    pub average_dt: f32,
    pub max_dt: f32,
}

impl FrameStats {
    pub fn fps(&self) -> f32 {
        if self.average_dt > 0.0 { 1.0 / self.average_dt } else { 0.0 }
    }
}

/// Per-window frame clock.
///
/// Delta time is clamped so a stall (debugger, minimized window) does not
/// feed a huge step into interaction code. The clock also accumulates the
/// clamped deltas into a rolling [`FrameStats`] window.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
    window: Duration,
    acc_frames: u32,
    acc_time: f32,
    acc_max: f32,
    acc_start: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        let now = Instant::now();
        Self {
            last: now,
            frame_index: 0,
            dt_min,
            dt_max,
            window: Duration::from_secs(1),
            acc_frames: 0,
            acc_time: 0.0,
            acc_max: 0.0,
            acc_start: now,
        }
    }

    /// Length of the statistics window.
    pub fn with_stats_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Restarts the delta baseline, e.g. after resuming.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> FrameTime {
        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max)
            .as_secs_f32();
        self.last = now;

        self.acc_frames += 1;
        self.acc_time += dt;
        self.acc_max = self.acc_max.max(dt);

        let ft = FrameTime { dt, now, frame_index: self.frame_index };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }

    /// Returns the statistics once the window has elapsed and starts a new
    /// window; `None` until then.
    pub fn take_stats(&mut self) -> Option<FrameStats> {
        self.take_stats_at(Instant::now())
    }

    fn take_stats_at(&mut self, now: Instant) -> Option<FrameStats> {
        if self.acc_frames == 0 || now.saturating_duration_since(self.acc_start) < self.window {
            return None;
        }
        let stats = FrameStats {
            frames: self.acc_frames,
            average_dt: self.acc_time / self.acc_frames as f32,
            max_dt: self.acc_max,
        };
        self.acc_frames = 0;
        self.acc_time = 0.0;
        self.acc_max = 0.0;
        self.acc_start = now;
        Some(stats)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
