use std::time::Duration;
use thiserror::Error;

/// Invalid state transitions on a stopwatch or countdown.
///
/// Returning one of these never changes the instance it came from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("stopwatch is already running")]
    AlreadyRunning,
    #[error("stopwatch is not running")]
    NotRunning,
    #[error("stopwatch is already paused")]
    AlreadyPaused,
    #[error("stopwatch is not paused")]
    NotPaused,
    #[error("timer has not been started")]
    NotStarted,
    #[error("duration must be greater than zero, got {0:?}")]
    InvalidDuration(Duration),
    #[error("countdown has already been started")]
    AlreadyStarted,
    #[error("countdown has already been awaited")]
    AlreadyJoined,
    #[error("no tokio runtime available to drive the timer")]
    NoRuntime,
    #[error("countdown task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, TimerError>;
