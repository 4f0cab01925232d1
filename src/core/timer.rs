use std::fmt;
use uuid::Uuid;

/// A Universally Unique Identifier (UUID) for stopwatches and countdowns.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct TimerId(pub Uuid);

impl TimerId {
    pub fn new() -> Self {
        TimerId(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimerId {
    // Short form keeps log lines readable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}
