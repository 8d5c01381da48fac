//! Capability traits for the two external systems the bridge talks to.
//!
//! The dispatcher and the hook filter depend only on these traits, never on
//! a concrete chat or tracker client.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// =============================================================================
// Chat
// =============================================================================

#[derive(Debug, Error)]
pub enum ChatError {
    /// The alias is already taken. Room creation treats this as success.
    #[error("room alias {alias} is already in use")]
    RoomAlreadyExists { alias: String },

    /// The connection to the homeserver is gone. Nothing was delivered.
    #[error("chat client is not connected")]
    NotConnected,

    #[error("chat request {operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

impl ChatError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRoomOptions {
    /// Local alias the room is found by, e.g. the issue key.
    pub alias: String,
    pub name: String,
    pub topic: Option<String>,
    /// Chat user ids to invite on creation.
    pub invite: Vec<String>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn connect(&self) -> Result<(), ChatError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn create_room(&self, options: &CreateRoomOptions) -> Result<RoomId, ChatError>;

    /// Resolve a room by its alias. `None` if no such room exists.
    async fn get_room_id_by_name(&self, alias: &str) -> Result<Option<RoomId>, ChatError>;

    async fn send_html_message(
        &self,
        room: &RoomId,
        plain: &str,
        html: &str,
    ) -> Result<(), ChatError>;

    async fn invite(&self, room: &RoomId, user_id: &str) -> Result<(), ChatError>;

    async fn room_members(&self, room: &RoomId) -> Result<Vec<String>, ChatError>;

    async fn set_room_topic(&self, room: &RoomId, topic: &str) -> Result<(), ChatError>;

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), ChatError>;

    /// Map a tracker user name onto a chat user id.
    fn chat_user_id(&self, tracker_user: &str) -> String {
        tracker_user.to_string()
    }
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(String),

    #[error("tracker returned HTTP {status} for {operation}")]
    Status { operation: &'static str, status: u16 },

    #[error("could not decode tracker {what}: {message}")]
    Decode { what: &'static str, message: String },
}

impl TrackerError {
    /// Whether asking again later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// An issue as reported by the tracker's REST API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub type_name: Option<String>,
    pub project_key: String,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub reporter: Option<String>,
    pub creator: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub id: String,
    pub name: String,
    pub lead: Option<String>,
    pub is_private: bool,
    /// "classic" or "next-gen".
    pub style: Option<String>,
}

impl Project {
    pub fn is_private_next_gen(&self) -> bool {
        self.is_private && self.style.as_deref() == Some("next-gen")
    }
}

#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> Result<(), TrackerError>;

    /// Fetch an issue by id or key. `Ok(None)` means the tracker says it
    /// does not exist.
    async fn get_issue(&self, id_or_key: &str) -> Result<Option<Issue>, TrackerError>;

    /// Like [`TrackerApi::get_issue`], but any failure yields `None`.
    async fn get_issue_safety(&self, id_or_key: &str) -> Option<Issue> {
        match self.get_issue(id_or_key).await {
            Ok(issue) => issue,
            Err(e) => {
                warn!("Could not fetch issue {}: {}", id_or_key, e);
                None
            }
        }
    }

    async fn get_project(&self, key: &str) -> Result<Option<Project>, TrackerError>;

    async fn get_issue_watchers(&self, key: &str) -> Result<Vec<String>, TrackerError>;

    /// Browser URL of an issue.
    fn issue_url(&self, key: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_private_next_gen_projects_are_flagged() {
        let mut project = Project {
            key: "ABC".to_string(),
            is_private: true,
            style: Some("classic".to_string()),
            ..Project::default()
        };
        assert!(!project.is_private_next_gen());

        project.style = Some("next-gen".to_string());
        assert!(project.is_private_next_gen());

        project.is_private = false;
        assert!(!project.is_private_next_gen());
    }

    #[test]
    fn test_only_outages_are_transient() {
        assert!(TrackerError::Unreachable("refused".to_string()).is_transient());
        assert!(TrackerError::Status {
            operation: "issue",
            status: 503
        }
        .is_transient());
        assert!(!TrackerError::Status {
            operation: "issue",
            status: 403
        }
        .is_transient());
        assert!(!TrackerError::Decode {
            what: "issue",
            message: "eof".to_string()
        }
        .is_transient());
    }
}
