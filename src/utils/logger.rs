use chrono::Utc;
use tokio::sync::Mutex;
use tokio::{
    sync::mpsc::{self, Receiver, Sender},
    time::{Duration, timeout},
};

/// Environment variable holding the minimum level printed by [`StdoutLogger`].
pub const LOG_LEVEL_ENV: &str = "LAPWATCH_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Reads [`LOG_LEVEL_ENV`], falling back to `Info` when unset or unrecognised.
    pub fn from_env() -> Self {
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|value| Self::parse(&value))
            .unwrap_or(LogLevel::Info)
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }
    fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }
    fn warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }
    fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }
}

pub struct StdoutLogger {
    min_level: LogLevel,
    sender: Option<Sender<String>>,
    receiver: Mutex<Option<Receiver<String>>>,
}

impl StdoutLogger {
    pub fn new() -> Self {
        Self {
            min_level: LogLevel::from_env(),
            sender: None,
            receiver: Mutex::new(None),
        }
    }

    pub fn with_level(mut self, min_level: LogLevel) -> Self {
        self.min_level = min_level;
        self
    }

    /// Mirrors every printed line into a channel that [`StdoutLogger::contains`] reads.
    pub fn with_receiver(mut self) -> Self {
        let (sender, receiver) = mpsc::channel::<String>(1024);
        self.sender = Some(sender);
        self.receiver = Mutex::new(Some(receiver));
        self
    }

    pub async fn contains(&self, needle: &str) -> bool {
        let mut guard = self.receiver.lock().await;

        let Some(receiver) = guard.as_mut() else {
            return false;
        };

        loop {
            match timeout(Duration::from_secs(2), receiver.recv()).await {
                Ok(Some(msg)) => {
                    if msg.contains(needle) {
                        return true;
                    }
                }
                Ok(None) => {
                    // channel closed
                    eprintln!("logger channel receiver closed");
                    return false;
                }
                Err(_) => {
                    // timeout elapsed
                    eprintln!("logger channel timeout elapsed");
                    return false;
                }
            }
        }
    }
}

impl Default for StdoutLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for StdoutLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let msg = format!("[{}] {:?}: {}", timestamp, level, message);

        println!("{}", msg);

        if let Some(sender) = &self.sender {
            // Lines are dropped once the test channel is full.
            let _ = sender.try_send(msg);
        }
    }
}
