//! Engine - tick drivers
//!
//! A clock only runs events when something calls `tick`. This module
//! provides the usual drivers:
//! - Realtime: wall-clock time, ticking every `tick_interval` with spin_sleep
//! - Offline: manual time, stepped tick by tick faster than realtime
//! - Block pump: sample time, one tick per rendered audio block

use crate::clock::{Clock, ClockConfig, TickOutcome};
use crate::time::{ManualTime, SampleTime, WallTime};
use spin_sleep::SpinSleeper;
use std::time::Duration;

/// Self-driven realtime loop around a clock.
pub struct Engine {
    clock: Clock,
    sleeper: SpinSleeper,
    tick_interval: f64,
}

impl Engine {
    /// Drive an existing clock.
    pub fn new(clock: Clock) -> Self {
        let tick_interval = clock.config().effective_tick_interval();
        Self {
            clock,
            sleeper: SpinSleeper::default(),
            tick_interval,
        }
    }

    /// Create a clock on wall-clock time and drive it.
    pub fn realtime(config: ClockConfig) -> Self {
        Self::new(Clock::with_config(WallTime::new(), config))
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Start the clock and tick until `is_done` returns true or the clock
    /// is stopped (possibly from inside a callback).
    pub fn run_until<F>(&mut self, is_done: F)
    where
        F: Fn() -> bool,
    {
        self.clock.start();
        loop {
            self.clock.tick();

            if is_done() || !self.clock.is_started() {
                break;
            }

            self.sleeper
                .sleep(Duration::from_secs_f64(self.tick_interval));
        }
        self.clock.stop();
    }

    /// Run for `seconds` of clock time.
    pub fn run_for(&mut self, seconds: f64) {
        let end = self.clock.to_absolute(seconds.max(0.0));
        let clock = self.clock.clone();
        self.run_until(move || clock.current_time() >= end);
    }
}

/// Deterministic stepping on manual time, one tick per `tick_interval`.
pub struct OfflineRunner {
    clock: Clock,
    time: ManualTime,
    tick_interval: f64,
}

impl OfflineRunner {
    pub fn new(config: ClockConfig) -> Self {
        let time = ManualTime::new(0.0);
        let tick_interval = config.effective_tick_interval();
        let clock = Clock::with_config(time.clone(), config);
        Self {
            clock,
            time,
            tick_interval,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> f64 {
        self.time.now()
    }

    /// Step by `dt` seconds.
    pub fn step_sec(&mut self, dt: f64) -> Vec<TickOutcome> {
        let s = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let target = self.now() + s;
        self.advance_to(target)
    }

    /// Tick at the current time, then at every tick boundary up to and
    /// including `target`.
    pub fn advance_to(&mut self, target: f64) -> Vec<TickOutcome> {
        let mut outcomes = self.clock.tick();

        loop {
            let now = self.time.now();
            if now >= target {
                break;
            }
            let next = (now + self.tick_interval).min(target);
            self.time.set(next);
            outcomes.extend(self.clock.tick());
        }

        outcomes
    }
}

/// Host-driven pump: the audio callback reports each rendered block.
pub struct BlockPump {
    clock: Clock,
    time: SampleTime,
}

impl BlockPump {
    pub fn new(sample_rate: u32, config: ClockConfig) -> Self {
        let time = SampleTime::new(sample_rate);
        let clock = Clock::with_config(time.clone(), config);
        Self { clock, time }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn time(&self) -> &SampleTime {
        &self.time
    }

    /// Account for `frames` rendered frames and tick once.
    pub fn process(&mut self, frames: u64) -> Vec<TickOutcome> {
        self.time.advance_frames(frames);
        self.clock.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Outcome;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_offline_basic() {
        let counter = Rc::new(Cell::new(0));
        let mut runner = OfflineRunner::new(ClockConfig {
            tick_interval: 0.01,
            ..Default::default()
        });

        let c = counter.clone();
        runner
            .clock()
            .schedule_at(0.1, move |_| c.set(c.get() + 1))
            .repeat(0.1)
            .unwrap();

        runner.step_sec(0.05);
        assert_eq!(counter.get(), 0);

        runner.step_sec(0.1);
        assert_eq!(counter.get(), 1);

        runner.step_sec(0.1);
        assert_eq!(counter.get(), 2);
        assert!((runner.now() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_offline_coarse_ticks_expire() {
        let mut runner = OfflineRunner::new(ClockConfig {
            tick_interval: 0.5,
            ..Default::default()
        });
        runner.clock().schedule_at(0.2, |_| {});

        let outcomes = runner.step_sec(1.0);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].outcome, Outcome::Expired);
    }

    #[test]
    fn test_block_pump() {
        let mut pump = BlockPump::new(48_000, ClockConfig::default());
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        pump.clock().schedule_at(0.01, move |_| f.set(true));

        // 256 frames at 48k is about 5.3ms per block.
        pump.process(256);
        assert!(!fired.get());
        let outcomes = pump.process(256);
        assert!(fired.get());
        assert_eq!(outcomes[0].outcome, Outcome::Executed);
        assert_eq!(pump.time().frames(), 512);
    }

    #[test]
    fn test_realtime_run_for() {
        let counter = Rc::new(Cell::new(0));
        let mut engine = Engine::realtime(ClockConfig {
            tick_interval: 0.001,
            tolerance_late: 0.05,
            ..Default::default()
        });

        let c = counter.clone();
        engine
            .clock()
            .schedule_after(0.005, move |_| c.set(c.get() + 1))
            .repeat(0.01)
            .unwrap();

        engine.run_for(0.05);
        assert!(counter.get() >= 3, "count was {}", counter.get());
        assert!(!engine.clock().is_started());
    }

    #[test]
    fn test_realtime_stop_from_callback() {
        let mut engine = Engine::realtime(ClockConfig {
            tick_interval: 0.001,
            tolerance_early: 0.0,
            ..Default::default()
        });
        let clock = engine.clock().clone();
        engine.clock().schedule_after(0.005, move |_| clock.stop());

        engine.run_until(|| false);
        assert!(engine.clock().current_time() >= 0.005);
    }
}
