//! Stopwatch and countdown timing primitives.
//!
//! [`Stopwatch`] measures running time across pause/resume cycles and records
//! laps. [`Countdown`] runs a callback after a fixed duration on a tokio task,
//! optionally reporting progress, and can be stopped or cancelled first.

pub mod core;
pub mod infra;
pub mod utils;

pub use crate::core::{
    Clock, Countdown, CountdownConfig, CountdownOutcome, Stopwatch, SystemClock, TimerError,
    TimerId, format_duration,
};
