//! Effects (side effects as data).
//!
//! Effects describe what should happen as a result of a state transition.
//! They are pure data; the interpreter executes them.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Connect to the chat backend, after the backoff for `attempt`.
    Connect { attempt: u32 },

    /// Run one drain of the queue.
    StartDrain,

    /// Log a message (for debugging/tracing).
    Log { level: LogLevel, message: String },
}

impl Effect {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
