//! Scheduled events
//!
//! An [`Event`] is a cheap, cloneable handle to one (possibly repeating)
//! scheduled callback. The owning [`Clock`] keeps the only strong reference
//! in its store; the event points back at the clock weakly.

use crate::clock::{Clock, ClockShared};
use crate::error::{ClockError, Result};
use crate::store::Timed;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Callback invoked with the event being executed.
pub type Callback = Rc<dyn Fn(&Event)>;

/// What happened to an event when it came due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Ran inside its tolerance window.
    Executed,
    /// Came due after `latest_time`; the callback was not invoked.
    Expired,
}

/// Where an event is in its lifecycle.
///
/// `Firing` and `Rescheduled` together form the reentrancy guard: an event
/// leaves `Firing` only if its own callback reschedules or clears it, and the
/// automatic repeat step runs only when it is still `Firing` afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPhase {
    /// Not in the store: fired without repeat.
    Idle,
    /// In the store, waiting to come due.
    Pending,
    /// Popped by the current tick, waiting for its turn in the batch.
    Due,
    /// Callback running, not rescheduled yet.
    Firing,
    /// Callback running and it already put the event back in the store.
    Rescheduled,
    /// Cancelled with [`Event::clear`].
    Cleared,
}

/// Partial tolerance update. Fields left as `None` keep their old value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Tolerance {
    pub early: Option<f64>,
    pub late: Option<f64>,
}

impl Tolerance {
    pub fn new(early: f64, late: f64) -> Self {
        Self {
            early: Some(early),
            late: Some(late),
        }
    }

    pub fn early(early: f64) -> Self {
        Self {
            early: Some(early),
            late: None,
        }
    }

    pub fn late(late: f64) -> Self {
        Self {
            early: None,
            late: Some(late),
        }
    }
}

/// Clamp a tolerance to a non-negative value. Infinity is kept: an
/// infinite late tolerance never expires.
pub(crate) fn clamp_tolerance(value: f64) -> f64 {
    if value >= 0.0 {
        value
    } else {
        tracing::warn!(value, "invalid tolerance clamped to 0");
        0.0
    }
}

pub(crate) struct EventState {
    pub deadline: f64,
    pub tolerance_early: f64,
    pub tolerance_late: f64,
    pub repeat_interval: Option<f64>,
    pub earliest_time: f64,
    pub latest_time: f64,
    pub phase: EventPhase,
}

impl EventState {
    fn update_bounds(&mut self) {
        self.earliest_time = self.deadline - self.tolerance_early;
        self.latest_time = self.deadline + self.tolerance_late;
    }
}

pub(crate) struct EventInner {
    id: u64,
    clock: Weak<ClockShared>,
    callback: Callback,
    state: RefCell<EventState>,
    on_executed: RefCell<Vec<Callback>>,
    on_expired: RefCell<Vec<Callback>>,
}

/// Handle to a scheduled event.
#[derive(Clone)]
pub struct Event(pub(crate) Rc<EventInner>);

impl Event {
    /// Build an event that is not yet in any store.
    pub(crate) fn new(
        clock: &Rc<ClockShared>,
        id: u64,
        deadline: f64,
        tolerance_early: f64,
        tolerance_late: f64,
        callback: Callback,
    ) -> Self {
        let mut state = EventState {
            deadline,
            tolerance_early: clamp_tolerance(tolerance_early),
            tolerance_late: clamp_tolerance(tolerance_late),
            repeat_interval: None,
            earliest_time: deadline,
            latest_time: deadline,
            phase: EventPhase::Idle,
        };
        state.update_bounds();

        Event(Rc::new(EventInner {
            id,
            clock: Rc::downgrade(clock),
            callback,
            state: RefCell::new(state),
            on_executed: RefCell::new(Vec::new()),
            on_expired: RefCell::new(Vec::new()),
        }))
    }

    /// Unique id within the owning clock.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Nominal due time.
    pub fn deadline(&self) -> f64 {
        self.0.state.borrow().deadline
    }

    /// `deadline - tolerance_early`.
    pub fn earliest_time(&self) -> f64 {
        self.0.state.borrow().earliest_time
    }

    /// `deadline + tolerance_late`. At or after this the event expires.
    pub fn latest_time(&self) -> f64 {
        self.0.state.borrow().latest_time
    }

    pub fn tolerance_early(&self) -> f64 {
        self.0.state.borrow().tolerance_early
    }

    pub fn tolerance_late(&self) -> f64 {
        self.0.state.borrow().tolerance_late
    }

    pub fn repeat_interval(&self) -> Option<f64> {
        self.0.state.borrow().repeat_interval
    }

    pub fn is_repeated(&self) -> bool {
        self.0.state.borrow().repeat_interval.is_some()
    }

    pub fn phase(&self) -> EventPhase {
        self.0.state.borrow().phase
    }

    /// True while the event sits in its clock's store.
    pub fn is_scheduled(&self) -> bool {
        matches!(self.phase(), EventPhase::Pending | EventPhase::Rescheduled)
    }

    /// The owning clock, if it is still alive.
    pub fn clock(&self) -> Option<Clock> {
        self.0.clock.upgrade().map(Clock)
    }

    /// Update the tolerance window. Unset fields keep their value.
    /// Bounds are recomputed and the event is re-sorted in the store.
    pub fn tolerance(&self, values: Tolerance) -> Event {
        {
            let mut s = self.0.state.borrow_mut();
            if let Some(late) = values.late {
                s.tolerance_late = clamp_tolerance(late);
            }
            if let Some(early) = values.early {
                s.tolerance_early = clamp_tolerance(early);
            }
            s.update_bounds();
        }
        self.reposition();
        self.clone()
    }

    /// Repeat every `interval` seconds after each execution or expiry.
    ///
    /// Fails on a zero (or NaN) interval and leaves the event untouched.
    /// The current deadline is not changed.
    pub fn repeat(&self, interval: f64) -> Result<Event> {
        if interval == 0.0 || interval.is_nan() {
            return Err(ClockError::invalid(format!(
                "repeat interval must be non-zero, got {interval}"
            )));
        }
        self.0.state.borrow_mut().repeat_interval = Some(interval);
        Ok(self.clone())
    }

    /// Move the event to `deadline`.
    ///
    /// If the clock has already reached the new earliest time, the event is
    /// executed (or expired) synchronously inside this call. A non-finite
    /// deadline is logged and ignored; use [`Event::try_schedule`] to get the
    /// error back.
    pub fn schedule(&self, deadline: f64) {
        if let Err(err) = self.try_schedule(deadline) {
            tracing::warn!(event = self.id(), ?err, "schedule ignored");
        }
    }

    /// [`Event::schedule`], failing on a non-finite deadline. The event and
    /// the store are untouched on error.
    pub fn try_schedule(&self, deadline: f64) -> Result<()> {
        if !deadline.is_finite() {
            return Err(ClockError::invalid(format!(
                "deadline must be finite, got {deadline}"
            )));
        }

        let clock = self.clock();
        {
            let mut s = self.0.state.borrow_mut();
            s.deadline = deadline;
            s.update_bounds();
            if clock.is_some() {
                s.phase = match s.phase {
                    EventPhase::Firing | EventPhase::Rescheduled => EventPhase::Rescheduled,
                    _ => EventPhase::Pending,
                };
            }
        }

        let Some(clock) = clock else {
            return Ok(());
        };
        clock.remove_event(self);
        clock.insert_event(self);
        tracing::trace!(event = self.id(), deadline, "event scheduled");

        if clock.current_time() >= self.earliest_time() {
            clock.remove_event(self);
            clock.fire(self);
        }
        Ok(())
    }

    /// Cancel the event. Calling it again, or after a one-shot event fired,
    /// does nothing.
    pub fn clear(&self) {
        if let Some(clock) = self.clock() {
            clock.remove_event(self);
        }
        self.set_phase(EventPhase::Cleared);
    }

    /// Register a listener called after each on-time execution.
    pub fn on_executed(&self, f: impl Fn(&Event) + 'static) -> Event {
        self.0.on_executed.borrow_mut().push(Rc::new(f));
        self.clone()
    }

    /// Register a listener called each time the event expires unexecuted.
    pub fn on_expired(&self, f: impl Fn(&Event) + 'static) -> Event {
        self.0.on_expired.borrow_mut().push(Rc::new(f));
        self.clone()
    }

    /// Drop every outcome listener.
    pub fn remove_listeners(&self) {
        self.0.on_executed.borrow_mut().clear();
        self.0.on_expired.borrow_mut().clear();
    }

    // --- crate internals ---

    pub(crate) fn set_phase(&self, phase: EventPhase) {
        self.0.state.borrow_mut().phase = phase;
    }

    pub(crate) fn invoke(&self) {
        let cb = self.0.callback.clone();
        cb(self);
    }

    pub(crate) fn emit(&self, outcome: Outcome) {
        let listeners: Vec<Callback> = match outcome {
            Outcome::Executed => self.0.on_executed.borrow().clone(),
            Outcome::Expired => self.0.on_expired.borrow().clone(),
        };
        for listener in listeners {
            listener(self);
        }
    }

    /// Set a repeat interval that has already been validated.
    pub(crate) fn set_repeat_interval(&self, interval: f64) {
        self.0.state.borrow_mut().repeat_interval = Some(interval);
    }

    /// Move to `deadline` and put back in the store, without the immediate
    /// execution check of [`Event::schedule`].
    pub(crate) fn advance_to(&self, deadline: f64) {
        {
            let mut s = self.0.state.borrow_mut();
            s.deadline = deadline;
            s.update_bounds();
            s.phase = EventPhase::Pending;
        }
        if let Some(clock) = self.clock() {
            clock.remove_event(self);
            clock.insert_event(self);
        }
    }

    /// Re-sort after a key change, only if currently stored.
    fn reposition(&self) {
        if let Some(clock) = self.clock() {
            if clock.remove_event(self) {
                clock.insert_event(self);
            }
        }
    }
}

impl Timed for Event {
    fn earliest_time(&self) -> f64 {
        self.0.state.borrow().earliest_time
    }

    fn same_entry(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.state.borrow();
        f.debug_struct("Event")
            .field("id", &self.0.id)
            .field("deadline", &s.deadline)
            .field("earliest_time", &s.earliest_time)
            .field("latest_time", &s.latest_time)
            .field("repeat_interval", &s.repeat_interval)
            .field("phase", &s.phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::{Clock, ClockConfig};
    use crate::error::ClockError;
    use crate::event::{EventPhase, Outcome, Tolerance};
    use crate::time::ManualTime;

    fn clock_at(t: f64) -> (Clock, ManualTime) {
        let time = ManualTime::new(t);
        (Clock::new(time.clone()), time)
    }

    #[test]
    fn test_default_tolerance_from_clock() {
        let time = ManualTime::new(0.0);
        let clock = Clock::with_config(
            time,
            ClockConfig {
                tolerance_early: 11.0,
                tolerance_late: 22.0,
                ..Default::default()
            },
        );
        let e = clock.schedule_at(50.0, |_| {});
        assert_eq!(e.tolerance_early(), 11.0);
        assert_eq!(e.tolerance_late(), 22.0);
    }

    #[test]
    fn test_tolerance_keeps_unset_fields() {
        let (clock, _) = clock_at(0.0);
        let e = clock.schedule_at(5.0, |_| {});
        let early = e.tolerance_early();

        e.tolerance(Tolerance::late(88.0));
        assert_eq!(e.tolerance_late(), 88.0);
        assert_eq!(e.tolerance_early(), early);

        e.tolerance(Tolerance::early(3.0));
        assert_eq!(e.tolerance_late(), 88.0);
        assert_eq!(e.tolerance_early(), 3.0);
    }

    #[test]
    fn test_cached_bounds_follow_updates() {
        let (clock, _) = clock_at(0.0);
        let e = clock.schedule_at(5.0, |_| {}).tolerance(Tolerance::new(2.0, 33.0));

        assert_eq!(e.deadline(), 5.0);
        assert_eq!(e.latest_time(), 5.0 + 33.0);
        assert_eq!(e.earliest_time(), 5.0 - 2.0);

        e.schedule(10.0);
        assert_eq!(e.deadline(), 10.0);
        assert_eq!(e.latest_time(), 10.0 + 33.0);
        assert_eq!(e.earliest_time(), 10.0 - 2.0);

        e.tolerance(Tolerance::new(4.0, 11.0));
        assert_eq!(e.latest_time(), 10.0 + 11.0);
        assert_eq!(e.earliest_time(), 10.0 - 4.0);
    }

    #[test]
    fn test_negative_tolerance_is_clamped() {
        let (clock, _) = clock_at(0.0);
        let e = clock.schedule_at(5.0, |_| {}).tolerance(Tolerance::new(-1.0, f64::NAN));
        assert_eq!(e.tolerance_early(), 0.0);
        assert_eq!(e.tolerance_late(), 0.0);
        assert!(e.earliest_time() <= e.latest_time());
    }

    #[test]
    fn test_infinite_tolerance_is_kept() {
        let (clock, time) = clock_at(0.0);
        let e = clock.schedule_at(1.0, |_| {}).tolerance(Tolerance::late(f64::INFINITY));
        assert_eq!(e.tolerance_late(), f64::INFINITY);

        time.set(1000.0);
        let outcomes = clock.tick();
        assert_eq!(outcomes[0].outcome, Outcome::Executed);
    }

    #[test]
    fn test_tolerance_resorts_store() {
        let (clock, _) = clock_at(0.0);
        let a = clock.schedule_at(3.0, |_| {});
        let b = clock.schedule_at(4.0, |_| {});
        assert_eq!(clock.pending(), vec![a.clone(), b.clone()]);

        b.tolerance(Tolerance::early(2.0));
        assert_eq!(clock.pending(), vec![b, a]);
    }

    #[test]
    fn test_schedule_updates_store_order() {
        let (clock, _) = clock_at(0.0);
        let e1 = clock.schedule_at(1.0, |_| {});
        let e2 = clock.schedule_at(0.5, |_| {});
        let e3 = clock.schedule_at(2.0, |_| {});

        let deadlines = |c: &Clock| c.pending().iter().map(|e| e.deadline()).collect::<Vec<_>>();
        assert_eq!(deadlines(&clock), vec![0.5, 1.0, 2.0]);

        e2.schedule(1.234);
        assert_eq!(deadlines(&clock), vec![1.0, 1.234, 2.0]);

        e3.schedule(0.2);
        assert_eq!(deadlines(&clock), vec![0.2, 1.0, 1.234]);
        assert_eq!(clock.pending(), vec![e3, e1, e2]);
    }

    #[test]
    fn test_repeat_sets_interval() {
        let (clock, _) = clock_at(0.0);
        let e = clock.schedule_at(1.0, |_| {}).repeat(1.234).unwrap();
        assert_eq!(e.deadline(), 1.0);
        assert_eq!(e.repeat_interval(), Some(1.234));
        assert!(e.is_repeated());
    }

    #[test]
    fn test_repeat_zero_is_rejected_without_change() {
        let (clock, _) = clock_at(0.0);
        let e = clock.schedule_at(1.0, |_| {});
        assert!(!e.is_repeated());

        assert!(matches!(e.repeat(0.0), Err(ClockError::InvalidArgument(_))));
        assert!(!e.is_repeated());

        e.repeat(0.5).unwrap();
        assert!(e.repeat(0.0).is_err());
        assert_eq!(e.repeat_interval(), Some(0.5));
        assert_eq!(e.deadline(), 1.0);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (clock, _) = clock_at(0.0);
        let e = clock.schedule_at(1000.0, |_| {});
        assert_eq!(clock.pending(), vec![e.clone()]);

        e.clear();
        assert!(clock.is_empty());
        assert_eq!(e.phase(), EventPhase::Cleared);

        e.clear();
        assert!(clock.is_empty());
    }

    #[test]
    fn test_event_outlives_clock() {
        let e = {
            let (clock, _) = clock_at(0.0);
            clock.schedule_at(1.0, |_| {})
        };
        assert!(e.clock().is_none());
        e.schedule(2.0);
        e.clear();
        assert_eq!(e.deadline(), 2.0);
    }
}
