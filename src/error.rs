//! Errors raised by the scheduling API.

use thiserror::Error;

/// Errors that can occur while configuring or rescheduling events.
///
/// Expiry is not represented here: an event that misses its tolerance window
/// reports [`Outcome::Expired`](crate::event::Outcome::Expired) instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClockError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClockError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ClockError::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ClockError>;
