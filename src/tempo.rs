//! Tempo helpers
//!
//! Rhythmic scheduling on top of the clock: beat grids, and tempo changes
//! expressed as a time-stretch of the events that make up a pattern.

use crate::clock::Clock;
use crate::error::{ClockError, Result};
use crate::event::Event;

fn check_bpm(bpm: f64) -> Result<f64> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(ClockError::invalid(format!("bpm must be positive and finite, got {bpm}")))
    }
}

/// A tempo whose changes are applied by stretching a cohort of events.
#[derive(Clone, Debug)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self> {
        Ok(Self { bpm: check_bpm(bpm)? })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Seconds per beat.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Change to `bpm`, stretching `cohort` around the current time by
    /// `old_bpm / new_bpm`. The tempo is unchanged if the stretch fails.
    pub fn set_bpm(&mut self, clock: &Clock, cohort: &[Event], bpm: f64) -> Result<Vec<Event>> {
        let bpm = check_bpm(bpm)?;
        let ratio = self.bpm / bpm;
        let events = clock.time_stretch_now(cohort, ratio)?;
        tracing::debug!(from = self.bpm, to = bpm, "tempo changed");
        self.bpm = bpm;
        Ok(events)
    }
}

/// Fixed bar/beat layout for step sequencing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeatGrid {
    pub beat_duration: f64,
    pub beats_per_bar: u32,
}

impl BeatGrid {
    pub fn new(bpm: f64, beats_per_bar: u32) -> Result<Self> {
        if beats_per_bar == 0 {
            return Err(ClockError::invalid("a bar needs at least one beat"));
        }
        Ok(Self {
            beat_duration: 60.0 / check_bpm(bpm)?,
            beats_per_bar,
        })
    }

    pub fn bar_duration(&self) -> f64 {
        self.beat_duration * self.beats_per_bar as f64
    }

    /// Next absolute time, strictly after `now`, of beat `beat_index` of a bar.
    /// Indices past the end of the bar wrap around.
    pub fn next_beat_time(&self, now: f64, beat_index: u32) -> f64 {
        let bar = self.bar_duration();
        let offset = (beat_index % self.beats_per_bar) as f64 * self.beat_duration;
        let bar_start = (now / bar).floor() * bar;
        let candidate = bar_start + offset;
        if candidate > now {
            candidate
        } else {
            candidate + bar
        }
    }
}
