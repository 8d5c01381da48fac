//! State of the connection/replay machine.
//!
//! At most one drain runs at a time: a drain exists exactly while the state
//! is `StartHandling` or `HandlingInProgress`. Requests arriving during a
//! drain are remembered in `drain_pending`, never started concurrently.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Init,
    /// Connecting to the chat backend. `attempt` counts failed attempts
    /// since the last successful connection.
    #[serde(rename_all = "camelCase")]
    StartConnection { attempt: u32 },
    /// Connected and idle.
    Ready,
    /// A drain was started and has not reported in yet.
    #[serde(rename_all = "camelCase")]
    StartHandling {
        drain_pending: bool,
        reconnect_required: bool,
    },
    /// A drain is running.
    #[serde(rename_all = "camelCase")]
    HandlingInProgress {
        drain_pending: bool,
        reconnect_required: bool,
    },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::StartConnection { .. } => "startConnection",
            Self::Ready => "ready",
            Self::StartHandling { .. } => "startHandling",
            Self::HandlingInProgress { .. } => "handlingInProgress",
        }
    }

    pub fn is_draining(&self) -> bool {
        matches!(
            self,
            Self::StartHandling { .. } | Self::HandlingInProgress { .. }
        )
    }

    /// Whether the chat connection is believed to be live.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Ready) || self.is_draining()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartConnection { attempt } if *attempt > 0 => {
                write!(f, "{} (attempt {})", self.name(), attempt + 1)
            }
            Self::StartHandling {
                drain_pending: true,
                ..
            }
            | Self::HandlingInProgress {
                drain_pending: true,
                ..
            } => write!(f, "{} (waiting)", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}
