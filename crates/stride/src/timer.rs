//! Performance measurement tools.

use std::{
    fmt, mem,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// A timer that can measure and average the time an operation takes.
///
/// Collected timings are averaged and reset when the timer is displayed using `{}`
/// ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    total: Duration,
    count: u32,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::default()),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    fn stop(&self, start: Instant) {
        let mut state = self.state.lock();
        state.total += start.elapsed();
        state.count += 1;
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = mem::take(&mut *self.state.lock());
        let avg_ms = if state.count == 0 {
            0.0
        } else {
            state.total.as_secs_f32() * 1000.0 / state.count as f32
        };

        write!(f, "{}: {}x{avg_ms:.01}ms", self.name, state.count)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

/// Counts processed frames per second of caller-supplied time.
///
/// Timestamps are passed in rather than read from the system clock, so the counter measures
/// whatever clock drives the loop (display refresh callbacks, recorded timestamps, test clocks).
pub struct FpsCounter {
    name: String,
    frames: u32,
    window_start: Option<Duration>,
    fps: f32,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            window_start: None,
            fps: 0.0,
        }
    }

    /// Records one processed frame at `now`.
    ///
    /// Once a full second has passed since the current window started, the number of frames
    /// processed in it is logged and becomes the new measurement. The frame closing a window opens
    /// the next one.
    pub fn tick(&mut self, now: Duration) {
        self.tick_with(now, format_args!(""));
    }

    /// Like [`FpsCounter::tick`], but appends `extra` to the logged line.
    pub fn tick_with(&mut self, now: Duration, extra: fmt::Arguments<'_>) {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return;
        };
        self.frames += 1;

        let elapsed = now.saturating_sub(start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames as f32 / elapsed.as_secs_f32();
            log::debug!("{}: {:.1} FPS{}", self.name, self.fps, extra);

            self.frames = 0;
            self.window_start = Some(now);
        }
    }

    /// Returns the frame rate measured over the last complete window.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.window_start = None;
        self.fps = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_supplied_clock() {
        let mut counter = FpsCounter::new("test");
        assert_eq!(counter.fps(), 0.0);

        let step = Duration::from_millis(100);
        for i in 0..=10 {
            counter.tick(step * i);
        }
        assert!((counter.fps() - 10.0).abs() < 0.01, "{}", counter.fps());

        counter.reset();
        assert_eq!(counter.fps(), 0.0);
    }

    #[test]
    fn timer_display_resets() {
        let timer = Timer::new("op");
        timer.time(|| {});
        timer.time(|| {});
        assert!(timer.to_string().starts_with("op: 2x"));
        assert_eq!(timer.to_string(), "op: 0x0.0ms");
    }
}
