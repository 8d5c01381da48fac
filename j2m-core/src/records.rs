//! Queue record types.
//!
//! Two disjoint families live in the durable queue:
//! - **Room records** describe rooms that must exist before anything is
//!   posted into them. They accumulate as a list under one well-known key.
//! - **Action records** each hold the normalized data for one late-bound
//!   chat action, stored under a key unique per `(funcName, timestamp)`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Names of the late-bound bot actions.
///
/// The declaration order is the dispatch order for actions produced by the
/// same webhook (same timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BotAction {
    InviteNewMembers,
    PostComment,
    PostIssueUpdates,
    PostEpicUpdates,
    PostProjectUpdates,
    PostNewLinks,
    PostLinkedChanges,
    PostLinksDeleted,
}

impl BotAction {
    pub const ALL: [BotAction; 8] = [
        BotAction::InviteNewMembers,
        BotAction::PostComment,
        BotAction::PostIssueUpdates,
        BotAction::PostEpicUpdates,
        BotAction::PostProjectUpdates,
        BotAction::PostNewLinks,
        BotAction::PostLinkedChanges,
        BotAction::PostLinksDeleted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::InviteNewMembers => "inviteNewMembers",
            Self::PostComment => "postComment",
            Self::PostIssueUpdates => "postIssueUpdates",
            Self::PostEpicUpdates => "postEpicUpdates",
            Self::PostProjectUpdates => "postProjectUpdates",
            Self::PostNewLinks => "postNewLinks",
            Self::PostLinkedChanges => "postLinkedChanges",
            Self::PostLinksDeleted => "postLinksDeleted",
        }
    }
}

impl fmt::Display for BotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommentData {
    pub issue_id: String,
    pub issue_key: Option<String>,
    pub header_text: String,
    pub comment_id: String,
    pub body: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteNewMembersData {
    pub issue_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostIssueUpdatesData {
    pub issue_key: String,
    pub summary: Option<String>,
    pub author: String,
    pub changes: Vec<FieldChange>,
    /// Set when the summary changed, so the room can be renamed.
    pub new_summary: Option<String>,
    pub new_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EpicUpdateKind {
    IssueAdded,
    StatusChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEpicUpdatesData {
    pub epic_key: String,
    pub issue_key: String,
    pub summary: Option<String>,
    pub kind: EpicUpdateKind,
    pub status: Option<String>,
    pub author: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectUpdateKind {
    EpicCreated,
    EpicStatusChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProjectUpdatesData {
    pub project_key: String,
    pub epic_key: String,
    pub summary: Option<String>,
    pub kind: ProjectUpdateKind,
    pub status: Option<String>,
    pub author: String,
}

/// One end of an issue link. The key is known when the hook embedded it;
/// otherwise it is resolved through the tracker at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEnd {
    pub id: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkData {
    pub link_id: String,
    pub source: LinkEnd,
    pub destination: LinkEnd,
    /// Relation as read from the source ("blocks").
    pub outward: String,
    /// Relation as read from the destination ("is blocked by").
    pub inward: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostNewLinksData {
    pub links: Vec<LinkData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLinkedChangesData {
    pub issue_key: String,
    pub summary: Option<String>,
    pub status: String,
    pub linked_keys: Vec<String>,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLinksDeletedData {
    pub link: LinkData,
}

/// A late-bound action together with its normalized data.
///
/// Serialized adjacently tagged: `{"funcName": "postComment", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "funcName", content = "data", rename_all = "camelCase")]
pub enum Action {
    InviteNewMembers(InviteNewMembersData),
    PostComment(PostCommentData),
    PostIssueUpdates(PostIssueUpdatesData),
    PostEpicUpdates(PostEpicUpdatesData),
    PostProjectUpdates(PostProjectUpdatesData),
    PostNewLinks(PostNewLinksData),
    PostLinkedChanges(PostLinkedChangesData),
    PostLinksDeleted(PostLinksDeletedData),
}

impl Action {
    pub fn kind(&self) -> BotAction {
        match self {
            Self::InviteNewMembers(_) => BotAction::InviteNewMembers,
            Self::PostComment(_) => BotAction::PostComment,
            Self::PostIssueUpdates(_) => BotAction::PostIssueUpdates,
            Self::PostEpicUpdates(_) => BotAction::PostEpicUpdates,
            Self::PostProjectUpdates(_) => BotAction::PostProjectUpdates,
            Self::PostNewLinks(_) => BotAction::PostNewLinks,
            Self::PostLinkedChanges(_) => BotAction::PostLinkedChanges,
            Self::PostLinksDeleted(_) => BotAction::PostLinksDeleted,
        }
    }
}

/// Key of an action record: unique per `(funcName, webhook timestamp)`, so a
/// redelivered webhook maps onto the same key.
pub fn action_key(kind: BotAction, timestamp: i64) -> String {
    format!("{}_{}", kind.name(), timestamp)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub redis_key: String,
    pub action: Action,
}

impl ActionRecord {
    pub fn new(action: Action, timestamp: i64) -> Self {
        Self {
            redis_key: action_key(action.kind(), timestamp),
            action,
        }
    }

    pub fn func_name(&self) -> &'static str {
        self.action.kind().name()
    }

    /// Webhook timestamp encoded in the key, if the key is well-formed.
    pub fn timestamp(&self) -> Option<i64> {
        self.redis_key
            .rsplit_once('_')
            .and_then(|(_, ts)| ts.parse().ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionFields {
    pub assignee_name: Option<String>,
    pub reporter_name: Option<String>,
    pub type_name: Option<String>,
    pub epic_link: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomIssue {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_fields: Option<DescriptionFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
}

/// Intent to have a room for an issue and/or a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<RoomIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
}

impl RoomRecord {
    /// Minimal record used when re-queuing a room that an action found missing.
    pub fn for_issue_key(key: impl Into<String>) -> Self {
        Self {
            issue: Some(RoomIssue {
                key: key.into(),
                id: None,
                summary: None,
                description_fields: None,
                project_key: None,
            }),
            project_key: None,
        }
    }

    pub fn for_project(key: impl Into<String>) -> Self {
        Self {
            issue: None,
            project_key: Some(key.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issue.is_none() && self.project_key.is_none()
    }
}

/// Anything the parser registry can emit for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Room(RoomRecord),
    Action(ActionRecord),
}

/// Everything persisted in the queue at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub rooms: Vec<RoomRecord>,
    /// Number of room-list entries read, including unreadable ones. Exactly
    /// this many entries are removed from the front of the list after the
    /// rooms have been handled, so entries appended meanwhile survive.
    pub rooms_read: usize,
    /// Actions ordered by webhook timestamp, then by [`BotAction`] order.
    pub actions: Vec<ActionRecord>,
    /// Action keys whose content could not be decoded.
    pub corrupt_keys: Vec<String>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.rooms_read == 0 && self.actions.is_empty() && self.corrupt_keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invite(key: &str) -> Action {
        Action::InviteNewMembers(InviteNewMembersData {
            issue_key: key.to_string(),
        })
    }

    #[test]
    fn test_action_key_uses_func_name_and_timestamp() {
        let record = ActionRecord::new(invite("ABC-1"), 1_700_000_000_123);
        assert_eq!(record.redis_key, "inviteNewMembers_1700000000123");
        assert_eq!(record.func_name(), "inviteNewMembers");
        assert_eq!(record.timestamp(), Some(1_700_000_000_123));
    }

    #[test]
    fn test_same_webhook_yields_same_key() {
        let a = ActionRecord::new(invite("ABC-1"), 42);
        let b = ActionRecord::new(invite("ABC-1"), 42);
        assert_eq!(a.redis_key, b.redis_key);
    }

    #[test]
    fn test_action_wire_format() {
        let record = ActionRecord::new(invite("ABC-1"), 7);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "redisKey": "inviteNewMembers_7",
                "action": {"funcName": "inviteNewMembers", "data": {"issueKey": "ABC-1"}}
            })
        );
        let back: ActionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_func_name_is_rejected() {
        let result: Result<ActionRecord, _> = serde_json::from_value(json!({
            "redisKey": "kick_1",
            "action": {"funcName": "kick", "data": {}}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_requeue_room_record_is_minimal() {
        let record = RoomRecord::for_issue_key("ABC-1");
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"issue": {"key": "ABC-1"}})
        );
        assert!(!record.is_empty());
        assert!(RoomRecord::default().is_empty());
    }
}
