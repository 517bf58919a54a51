//! Clock
//!
//! The user-facing scheduling API. A clock owns the ordered store of pending
//! events and runs them when [`Clock::tick`] is called by whatever drives it
//! (an [`Engine`](crate::engine::Engine), an audio callback, a test).

use crate::error::Result;
use crate::event::{clamp_tolerance, Callback, Event, EventPhase, Outcome, Tolerance};
use crate::store::OrderedStore;
use crate::stretch::skip_elapsed;
use crate::time::TimeSource;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What happens to a repeating event whose next deadline is already behind
/// the clock when it is rescheduled after firing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Advance by exactly one interval and let the next tick decide.
    #[default]
    Step,
    /// Skip every elapsed period without firing it.
    CatchUp,
}

/// Clock configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Default early tolerance for new events (seconds).
    pub tolerance_early: f64,
    /// Default late tolerance for new events (seconds).
    pub tolerance_late: f64,
    /// Period at which self-driven loops call `tick` (seconds).
    pub tick_interval: f64,
    pub repeat_policy: RepeatPolicy,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tolerance_early: 0.001,
            tolerance_late: 0.100,
            // One 256-frame audio block at 44.1 kHz.
            tick_interval: 256.0 / 44_100.0,
            repeat_policy: RepeatPolicy::Step,
        }
    }
}

impl ClockConfig {
    /// `tick_interval` if usable, otherwise the default.
    pub fn effective_tick_interval(&self) -> f64 {
        if self.tick_interval.is_finite() && self.tick_interval > 0.0 {
            self.tick_interval
        } else {
            ClockConfig::default().tick_interval
        }
    }
}

/// Record of one event handled by a tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickOutcome {
    pub event_id: u64,
    /// Deadline the event was handled for.
    pub deadline: f64,
    pub outcome: Outcome,
}

pub(crate) struct ClockShared {
    time: Box<dyn TimeSource>,
    store: RefCell<OrderedStore<Event>>,
    config: RefCell<ClockConfig>,
    started: Cell<bool>,
    next_id: Cell<u64>,
    /// Bumped by `clear_all` so in-flight ticks and callbacks notice it.
    clear_epoch: Cell<u64>,
}

/// A handle to a clock. Clones share the same store.
#[derive(Clone)]
pub struct Clock(pub(crate) Rc<ClockShared>);

impl Clock {
    /// Create a clock with the default configuration.
    pub fn new(time: impl TimeSource + 'static) -> Self {
        Self::with_config(time, ClockConfig::default())
    }

    pub fn with_config(time: impl TimeSource + 'static, config: ClockConfig) -> Self {
        let config = ClockConfig {
            tolerance_early: clamp_tolerance(config.tolerance_early),
            tolerance_late: clamp_tolerance(config.tolerance_late),
            ..config
        };
        Clock(Rc::new(ClockShared {
            time: Box::new(time),
            store: RefCell::new(OrderedStore::new()),
            config: RefCell::new(config),
            started: Cell::new(false),
            next_id: Cell::new(0),
            clear_epoch: Cell::new(0),
        }))
    }

    /// Current reading of the time source.
    pub fn current_time(&self) -> f64 {
        self.0.time.current_time()
    }

    /// Relative delay to absolute time.
    pub fn to_absolute(&self, relative: f64) -> f64 {
        relative + self.current_time()
    }

    /// Absolute time to delay from now.
    pub fn to_relative(&self, absolute: f64) -> f64 {
        absolute - self.current_time()
    }

    pub fn config(&self) -> ClockConfig {
        self.0.config.borrow().clone()
    }

    /// Change the tolerance given to events created from now on.
    pub fn set_default_tolerance(&self, values: Tolerance) {
        let mut c = self.0.config.borrow_mut();
        if let Some(early) = values.early {
            c.tolerance_early = clamp_tolerance(early);
        }
        if let Some(late) = values.late {
            c.tolerance_late = clamp_tolerance(late);
        }
    }

    pub fn set_repeat_policy(&self, policy: RepeatPolicy) {
        self.0.config.borrow_mut().repeat_policy = policy;
    }

    /// Run `callback` `delay` seconds from now.
    ///
    /// A non-finite delay is logged and the event is returned unscheduled.
    pub fn schedule_after(&self, delay: f64, callback: impl Fn(&Event) + 'static) -> Event {
        self.schedule_at(self.to_absolute(delay), callback)
    }

    /// Run `callback` at absolute time `deadline`.
    ///
    /// A non-finite deadline is logged and the event is returned unscheduled.
    pub fn schedule_at(&self, deadline: f64, callback: impl Fn(&Event) + 'static) -> Event {
        let event = self.create_event(deadline, Rc::new(callback));
        event.schedule(deadline);
        event
    }

    /// [`Clock::schedule_after`], failing on a non-finite delay.
    pub fn try_schedule_after(
        &self,
        delay: f64,
        callback: impl Fn(&Event) + 'static,
    ) -> Result<Event> {
        self.try_schedule_at(self.to_absolute(delay), callback)
    }

    /// [`Clock::schedule_at`], failing on a non-finite deadline. Nothing is
    /// stored on error.
    pub fn try_schedule_at(
        &self,
        deadline: f64,
        callback: impl Fn(&Event) + 'static,
    ) -> Result<Event> {
        let event = self.create_event(deadline, Rc::new(callback));
        event.try_schedule(deadline)?;
        Ok(event)
    }

    /// Mark the clock as driven. Self-driven loops run while started.
    pub fn start(&self) {
        if !self.0.started.replace(true) {
            tracing::debug!(now = self.current_time(), "clock started");
        }
    }

    pub fn stop(&self) {
        if self.0.started.replace(false) {
            tracing::debug!(now = self.current_time(), "clock stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.0.started.get()
    }

    /// Pending events in execution order.
    pub fn pending(&self) -> Vec<Event> {
        self.0.store.borrow().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.store.borrow().is_empty()
    }

    /// Earliest time at which the next pending event may run.
    pub fn next_due_time(&self) -> Option<f64> {
        self.0.store.borrow().first().map(|e| e.earliest_time())
    }

    /// Cancel every event: the pending ones, the rest of a batch being
    /// handled by the current tick, and the event whose callback is running
    /// (it will not repeat). Events scheduled afterwards are kept.
    pub fn clear_all(&self) {
        self.0.clear_epoch.set(self.0.clear_epoch.get() + 1);
        let events = self.0.store.borrow_mut().take_all();
        tracing::debug!(count = events.len(), "clearing all events");
        for e in events {
            e.set_phase(EventPhase::Cleared);
        }
    }

    /// Handle every event whose earliest time has been reached, in order.
    ///
    /// Each event is handled at most once per call: a repeat that lands
    /// in the past waits for the next tick.
    pub fn tick(&self) -> Vec<TickOutcome> {
        let now = self.current_time();
        let due = self.0.store.borrow_mut().drain_due(now);
        if due.is_empty() {
            return Vec::new();
        }
        for e in &due {
            e.set_phase(EventPhase::Due);
        }

        let epoch = self.0.clear_epoch.get();
        let mut outcomes = Vec::with_capacity(due.len());
        for e in due {
            // Cleared or rescheduled by an earlier callback of this batch.
            if e.phase() != EventPhase::Due {
                continue;
            }
            if self.0.clear_epoch.get() != epoch {
                e.set_phase(EventPhase::Cleared);
                continue;
            }
            outcomes.push(self.fire(&e));
        }
        outcomes
    }

    // --- crate internals ---

    fn create_event(&self, deadline: f64, callback: Callback) -> Event {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);

        let (early, late) = {
            let c = self.0.config.borrow();
            (c.tolerance_early, c.tolerance_late)
        };
        Event::new(&self.0, id, deadline, early, late, callback)
    }

    pub(crate) fn insert_event(&self, event: &Event) {
        self.0.store.borrow_mut().insert(event.clone());
    }

    pub(crate) fn remove_event(&self, event: &Event) -> bool {
        self.0.store.borrow_mut().remove(event)
    }

    /// Execute or expire an event that is out of the store, then apply the
    /// repeat step unless its own callback already rescheduled or cleared it.
    pub(crate) fn fire(&self, event: &Event) -> TickOutcome {
        let now = self.current_time();
        let deadline = event.deadline();
        let latest = event.latest_time();
        let epoch = self.0.clear_epoch.get();
        event.set_phase(EventPhase::Firing);

        let outcome = if now < latest {
            tracing::trace!(event = event.id(), deadline, now, "executing event");
            event.invoke();
            event.emit(Outcome::Executed);
            Outcome::Executed
        } else {
            tracing::warn!(event = event.id(), deadline, now, "event expired");
            event.emit(Outcome::Expired);
            Outcome::Expired
        };

        if event.phase() == EventPhase::Firing && self.0.clear_epoch.get() != epoch {
            event.set_phase(EventPhase::Cleared);
        }

        match event.phase() {
            EventPhase::Firing => match event.repeat_interval() {
                Some(interval) => {
                    let mut next = event.deadline() + interval;
                    if self.0.config.borrow().repeat_policy == RepeatPolicy::CatchUp {
                        let (skipped_to, skipped) =
                            skip_elapsed(next, interval, event.tolerance_early(), self.current_time());
                        if skipped > 0 {
                            tracing::debug!(event = event.id(), skipped, "skipping elapsed repeats");
                        }
                        next = skipped_to;
                    }
                    event.advance_to(next);
                }
                None => event.set_phase(EventPhase::Idle),
            },
            EventPhase::Rescheduled => event.set_phase(EventPhase::Pending),
            _ => {}
        }

        TickOutcome {
            event_id: event.id(),
            deadline,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualTime;

    #[test]
    fn test_time_conversions() {
        let time = ManualTime::new(1.0);
        let clock = Clock::new(time.clone());
        assert_eq!(clock.to_relative(2.0), 1.0);
        assert_eq!(clock.to_relative(0.0), -1.0);
        assert_eq!(clock.to_absolute(2.0), 3.0);
        assert_eq!(clock.to_absolute(-0.75), 0.25);

        time.set(3.0);
        assert_eq!(clock.to_absolute(2.0), 5.0);
    }

    #[test]
    fn test_create_events_in_order() {
        let clock = Clock::new(ManualTime::new(0.0));
        let e1 = clock.schedule_at(300.0, |_| {});
        let e2 = clock.schedule_at(1000.0, |_| {});
        let e3 = clock.schedule_at(200.5, |_| {});
        assert_eq!(clock.pending(), vec![e3, e1, e2]);
        assert_eq!(clock.next_due_time(), Some(200.5 - 0.001));
    }

    #[test]
    fn test_ids_are_sequential() {
        let clock = Clock::new(ManualTime::new(0.0));
        let a = clock.schedule_at(1.0, |_| {});
        let b = clock.schedule_at(1.0, |_| {});
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
    }

    #[test]
    fn test_start_stop() {
        let clock = Clock::new(ManualTime::new(0.0));
        assert!(!clock.is_started());
        clock.start();
        clock.start();
        assert!(clock.is_started());
        clock.stop();
        assert!(!clock.is_started());
    }

    #[test]
    fn test_clear_all() {
        let clock = Clock::new(ManualTime::new(0.0));
        let a = clock.schedule_at(1.0, |_| {});
        let b = clock.schedule_at(2.0, |_| {}).repeat(1.0).unwrap();
        clock.clear_all();
        assert!(clock.is_empty());
        assert_eq!(a.phase(), EventPhase::Cleared);
        assert_eq!(b.phase(), EventPhase::Cleared);
    }

    #[test]
    fn test_default_tolerance_change_applies_to_new_events() {
        let clock = Clock::new(ManualTime::new(0.0));
        let before = clock.schedule_at(5.0, |_| {});
        clock.set_default_tolerance(Tolerance::late(0.5));
        let after = clock.schedule_at(5.0, |_| {});
        assert_eq!(before.tolerance_late(), 0.1);
        assert_eq!(after.tolerance_late(), 0.5);
        assert_eq!(after.tolerance_early(), 0.001);
    }

    #[test]
    fn test_config_from_json() {
        let config: ClockConfig =
            serde_json::from_str(r#"{ "tolerance_late": 0.25, "repeat_policy": "catch_up" }"#)
                .unwrap();
        assert_eq!(config.tolerance_late, 0.25);
        assert_eq!(config.tolerance_early, 0.001);
        assert_eq!(config.repeat_policy, RepeatPolicy::CatchUp);

        let text = serde_json::to_string(&config).unwrap();
        let back: ClockConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_effective_tick_interval() {
        let config = ClockConfig {
            tick_interval: 0.0,
            ..Default::default()
        };
        assert_eq!(
            config.effective_tick_interval(),
            ClockConfig::default().tick_interval
        );
    }
}
