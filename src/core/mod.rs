mod clock;
pub use clock::{Clock, SystemClock};

mod countdown;
pub use countdown::{
    Callback, Countdown, CountdownConfig, CountdownOutcome, DEFAULT_PROGRESS_CAPACITY,
    DEFAULT_TICK_INTERVAL, MAX_PROGRESS_CAPACITY,
};

mod error;
pub use error::{Result, TimerError};

mod format;
pub use format::format_duration;

mod stopwatch;
pub use stopwatch::Stopwatch;

mod timer;
pub use timer::TimerId;
