//! Time sources
//!
//! The clock never advances time itself. It reads a [`TimeSource`] whose
//! reading is monotonically non-decreasing, in seconds.
//! - `ManualTime`: stepped by the caller (offline runs, tests)
//! - `WallTime`: monotonic wall clock with an optional rate multiplier
//! - `SampleTime`: frames rendered divided by the sample rate

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Anything that can report the current time in seconds.
pub trait TimeSource {
    /// Current reading. Successive calls never go backwards.
    fn current_time(&self) -> f64;
}

impl<T: TimeSource + ?Sized> TimeSource for Rc<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }
}

/// A time source advanced explicitly by the caller.
///
/// Clones share the same reading, so a test can keep one handle and give
/// another to the clock.
#[derive(Clone, Debug, Default)]
pub struct ManualTime {
    now: Rc<Cell<f64>>,
}

impl ManualTime {
    pub fn new(start: f64) -> Self {
        let start = if start.is_finite() { start } else { 0.0 };
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Move the reading to `t`. Requests to go backwards are ignored.
    pub fn set(&self, t: f64) {
        if t.is_finite() && t > self.now.get() {
            self.now.set(t);
        }
    }

    /// Move the reading forward by `dt` seconds.
    pub fn advance(&self, dt: f64) {
        self.set(self.now.get() + dt);
    }

    pub fn now(&self) -> f64 {
        self.now.get()
    }
}

impl TimeSource for ManualTime {
    fn current_time(&self) -> f64 {
        self.now.get()
    }
}

/// Monotonic wall-clock time, optionally dilated by a rate multiplier.
#[derive(Debug)]
pub struct WallTime {
    rate: Cell<f64>,
    wall_anchor: Cell<Instant>,
    logical_anchor: Cell<f64>,
}

impl Default for WallTime {
    fn default() -> Self {
        Self::new()
    }
}

impl WallTime {
    /// Starts reading 0.0 now, at rate 1.0.
    pub fn new() -> Self {
        Self {
            rate: Cell::new(1.0),
            wall_anchor: Cell::new(Instant::now()),
            logical_anchor: Cell::new(0.0),
        }
    }

    /// Change the dilation rate without a jump in the reading.
    pub fn set_rate(&self, rate: f64) {
        let r = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            1.0
        };
        let l = self.current_time();
        self.logical_anchor.set(l);
        self.wall_anchor.set(Instant::now());
        self.rate.set(r);
    }

    pub fn rate(&self) -> f64 {
        self.rate.get()
    }
}

impl TimeSource for WallTime {
    fn current_time(&self) -> f64 {
        let dt = Instant::now()
            .duration_since(self.wall_anchor.get())
            .as_secs_f64();
        self.logical_anchor.get() + dt * self.rate.get()
    }
}

/// A sample-accurate audio clock: frames processed over the sample rate.
#[derive(Clone, Debug)]
pub struct SampleTime {
    frames: Rc<Cell<u64>>,
    sample_rate: u32,
}

impl SampleTime {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Rc::new(Cell::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames.get()
    }

    /// Account for a rendered block of `frames`.
    pub fn advance_frames(&self, frames: u64) {
        self.frames.set(self.frames.get().saturating_add(frames));
    }
}

impl TimeSource for SampleTime {
    #[inline]
    fn current_time(&self) -> f64 {
        (self.frames.get() as f64) / (self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_is_monotonic() {
        let t = ManualTime::new(1.0);
        t.set(2.5);
        assert!((t.current_time() - 2.5).abs() < 1e-12);

        t.set(1.0);
        assert!((t.current_time() - 2.5).abs() < 1e-12);

        t.advance(0.5);
        assert!((t.current_time() - 3.0).abs() < 1e-12);

        t.set(f64::NAN);
        assert!((t.current_time() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_manual_time_clones_share_reading() {
        let a = ManualTime::new(0.0);
        let b = a.clone();
        a.set(4.0);
        assert!((b.current_time() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_time() {
        let t = SampleTime::new(48_000);
        assert_eq!(t.current_time(), 0.0);
        t.advance_frames(24_000);
        assert!((t.current_time() - 0.5).abs() < 1e-12);
        t.advance_frames(256);
        assert_eq!(t.frames(), 24_256);
    }

    #[test]
    fn test_wall_time_advances() {
        let t = WallTime::new();
        let a = t.current_time();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = t.current_time();
        assert!(b > a);

        t.set_rate(-3.0);
        assert_eq!(t.rate(), 1.0);
        assert!(t.current_time() >= b);
    }
}
