//! Events that trigger state transitions.

use crate::dispatch::DrainReport;

/// What asked for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// Records were queued by an incoming webhook.
    Webhook,
    /// The periodic safety timer fired.
    Timer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// The queue could not be read or written. Records stay queued.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The process started.
    Start,

    // =========================================================================
    // Connection
    // =========================================================================
    Connected,
    ConnectionFailed { error: String },
    /// The chat connection was lost.
    Disconnected,

    // =========================================================================
    // Draining
    // =========================================================================
    DrainRequested { trigger: DrainTrigger },
    /// The interpreter has launched the drain task.
    DrainStarted,
    DrainFinished { outcome: DrainOutcome },
}
