//! Time-stretch
//!
//! Rescales a cohort of events around a reference instant: every deadline
//! keeps its offset from the reference multiplied by `ratio`, and repeat
//! intervals are multiplied by `ratio`. This is a tempo change
//! (`ratio < 1` speeds up, `ratio > 1` slows down).

use crate::clock::Clock;
use crate::error::{ClockError, Result};
use crate::event::{Event, EventPhase};

/// `reference + ratio * (deadline - reference)`.
#[inline]
pub fn stretch_deadline(reference: f64, deadline: f64, ratio: f64) -> f64 {
    reference + ratio * (deadline - reference)
}

const MAX_ROUNDING_STEPS: u32 = 8;

/// Smallest `deadline + k * interval` (k >= 0) whose earliest time
/// (`- tolerance_early`) lies strictly after `now`. Returns it with `k`.
///
/// Non-positive or non-finite intervals, and an infinite early tolerance
/// (no deadline can ever be in the future), return the deadline unchanged.
/// For intervals too small to count in a `u64`, `k` saturates.
pub fn skip_elapsed(deadline: f64, interval: f64, tolerance_early: f64, now: f64) -> (f64, u64) {
    if !(interval.is_finite() && interval > 0.0) || !tolerance_early.is_finite() {
        return (deadline, 0);
    }
    let earliest = deadline - tolerance_early;
    if earliest > now {
        return (deadline, 0);
    }

    let mut k = (((now - earliest) / interval).floor() as u64).saturating_add(1);
    let mut next = deadline + k as f64 * interval;
    // Rounding can leave the candidate exactly on `now`.
    for _ in 0..MAX_ROUNDING_STEPS {
        if next - tolerance_early > now {
            break;
        }
        let Some(k1) = k.checked_add(1) else {
            break;
        };
        k = k1;
        next = deadline + k as f64 * interval;
    }
    (next, k)
}

impl Clock {
    /// Stretch `events` around `reference` by `ratio`.
    ///
    /// A repeating event whose stretched deadline is already reachable is
    /// moved forward by whole (stretched) periods without running it. A
    /// one-shot event moved into the past runs immediately, like any
    /// [`Event::schedule`]. Cleared or finished events are left alone.
    ///
    /// Safe to call from inside an event callback, including on the event
    /// being executed.
    pub fn time_stretch(&self, reference: f64, events: &[Event], ratio: f64) -> Result<Vec<Event>> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(ClockError::invalid(format!(
                "stretch ratio must be positive and finite, got {ratio}"
            )));
        }
        if !reference.is_finite() {
            return Err(ClockError::invalid("stretch reference must be finite"));
        }

        tracing::debug!(reference, ratio, count = events.len(), "time stretch");
        let now = self.current_time();

        for event in events {
            if matches!(event.phase(), EventPhase::Idle | EventPhase::Cleared) {
                continue;
            }

            let mut deadline = stretch_deadline(reference, event.deadline(), ratio);
            if let Some(interval) = event.repeat_interval() {
                let interval = interval * ratio;
                event.set_repeat_interval(interval);

                let (next, skipped) = skip_elapsed(deadline, interval, event.tolerance_early(), now);
                if skipped > 0 {
                    tracing::debug!(event = event.id(), skipped, "stretch skipped elapsed repeats");
                }
                deadline = next;
            }
            event.schedule(deadline);
        }

        Ok(events.to_vec())
    }

    /// [`Clock::time_stretch`] around the current time.
    pub fn time_stretch_now(&self, events: &[Event], ratio: f64) -> Result<Vec<Event>> {
        self.time_stretch(self.current_time(), events, ratio)
    }
}
