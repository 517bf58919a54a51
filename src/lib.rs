//! Rust Clock Library
//!
//! Precision event scheduling against an externally advancing time source
//! (typically an audio clock) with:
//! - Tolerance windows: events run anywhere in `[deadline - early, deadline + late)`
//!   and expire unexecuted past that
//! - Repeating events, rescheduled after every execution or expiry
//! - Reentrant-safe rescheduling and cancellation from inside callbacks
//! - Time-stretch of a cohort of events (tempo changes)
//! - Realtime (spin_sleep), offline stepping and audio-block tick drivers

pub mod error;
pub mod time;
pub mod store;
pub mod event;
pub mod clock;
pub mod stretch;
pub mod tempo;
pub mod engine;


pub use clock::{Clock, ClockConfig, RepeatPolicy, TickOutcome};
pub use engine::{BlockPump, Engine, OfflineRunner};
pub use error::{ClockError, Result};
pub use event::{Event, EventPhase, Outcome, Tolerance};
pub use tempo::{BeatGrid, Tempo};
pub use time::{ManualTime, SampleTime, TimeSource, WallTime};
