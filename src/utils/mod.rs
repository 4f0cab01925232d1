mod logger;
pub use logger::{LOG_LEVEL_ENV, LogLevel, Logger, StdoutLogger};
