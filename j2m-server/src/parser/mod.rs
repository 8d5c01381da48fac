//! Parser registry: turns an accepted webhook into queue records.
//!
//! Each bot action has a pair of pure functions, one deciding whether the
//! hook is eligible for it and one extracting the minimal data the action
//! needs. A single hook may yield several action records. Room creation is
//! decided separately and, when eligible, is emitted alongside them.

mod comment;
mod epic;
mod issue;
mod links;
mod room;

use thiserror::Error;
use tracing::{debug, warn};

use j2m_core::records::{Action, ActionRecord, BotAction, QueueItem};
use j2m_core::WebhookEvent;

use crate::config::Features;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("webhook is missing {0}")]
    MissingField(&'static str),

    #[error("webhook field {field} is invalid: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

type Eligible = fn(&WebhookEvent, &Features) -> bool;
type Parse = fn(&WebhookEvent, &Features) -> Result<Action, ParseError>;

struct ParserEntry {
    kind: BotAction,
    eligible: Eligible,
    parse: Parse,
}

/// Action parsers, in dispatch order.
static PARSERS: &[ParserEntry] = &[
    ParserEntry {
        kind: BotAction::InviteNewMembers,
        eligible: issue::is_invite_new_members,
        parse: issue::parse_invite_new_members,
    },
    ParserEntry {
        kind: BotAction::PostComment,
        eligible: comment::is_post_comment,
        parse: comment::parse_post_comment,
    },
    ParserEntry {
        kind: BotAction::PostIssueUpdates,
        eligible: issue::is_post_issue_updates,
        parse: issue::parse_post_issue_updates,
    },
    ParserEntry {
        kind: BotAction::PostEpicUpdates,
        eligible: epic::is_post_epic_updates,
        parse: epic::parse_post_epic_updates,
    },
    ParserEntry {
        kind: BotAction::PostProjectUpdates,
        eligible: epic::is_post_project_updates,
        parse: epic::parse_post_project_updates,
    },
    ParserEntry {
        kind: BotAction::PostNewLinks,
        eligible: links::is_post_new_links,
        parse: links::parse_post_new_links,
    },
    ParserEntry {
        kind: BotAction::PostLinkedChanges,
        eligible: links::is_post_linked_changes,
        parse: links::parse_post_linked_changes,
    },
    ParserEntry {
        kind: BotAction::PostLinksDeleted,
        eligible: links::is_post_links_deleted,
        parse: links::parse_post_links_deleted,
    },
];

pub struct ParserRegistry {
    features: Features,
}

impl ParserRegistry {
    pub fn new(features: Features) -> Self {
        Self { features }
    }

    /// Bot actions this hook is eligible for, in dispatch order.
    pub fn eligible_actions(&self, event: &WebhookEvent) -> Vec<BotAction> {
        PARSERS
            .iter()
            .filter(|entry| (entry.eligible)(event, &self.features))
            .map(|entry| entry.kind)
            .collect()
    }

    pub fn is_room_eligible(&self, event: &WebhookEvent) -> bool {
        room::is_create_room(event, &self.features)
    }

    pub fn normalize(&self, event: &WebhookEvent) -> Result<Vec<QueueItem>, ParseError> {
        let timestamp = event
            .timestamp
            .ok_or(ParseError::MissingField("timestamp"))?;

        let mut items = Vec::new();
        if self.is_room_eligible(event) {
            items.push(QueueItem::Room(room::parse_create_room(
                event,
                &self.features,
            )?));
        }

        // A parser that fails only costs the hook its own record; the hook
        // is rejected when nothing at all could be extracted.
        let mut first_error = None;
        for entry in PARSERS {
            if !(entry.eligible)(event, &self.features) {
                continue;
            }
            match (entry.parse)(event, &self.features) {
                Ok(action) => {
                    debug!("Hook {} yields {}", event.event_name(), entry.kind);
                    items.push(QueueItem::Action(ActionRecord::new(action, timestamp)));
                }
                Err(e) => {
                    warn!("Skipping {} for hook {}: {}", entry.kind, event.event_name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if items.is_empty() => Err(e),
            _ => Ok(items),
        }
    }
}

// =============================================================================
// Shared extraction helpers
// =============================================================================

fn require_issue(event: &WebhookEvent) -> Result<&j2m_core::webhook::HookIssue, ParseError> {
    event.issue.as_ref().ok_or(ParseError::MissingField("issue"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use j2m_core::records::RoomRecord;
    use serde_json::json;

    fn event(value: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_issue_created_yields_room_record() {
        let registry = ParserRegistry::new(Features::default());
        let hook = event(json!({
            "webhookEvent": "jira:issue_created",
            "timestamp": 1000,
            "issue": {"id": "10001", "key": "ABC-1", "fields": {"summary": "S"}}
        }));

        let items = registry.normalize(&hook).unwrap();
        assert_eq!(items.len(), 1);
        let QueueItem::Room(RoomRecord { issue: Some(issue), project_key: None }) = &items[0] else {
            panic!("expected issue room record, got {:?}", items[0]);
        };
        assert_eq!(issue.key, "ABC-1");
        assert_eq!(issue.summary.as_deref(), Some("S"));
    }

    #[test]
    fn test_issue_updated_yields_several_actions() {
        let registry = ParserRegistry::new(Features::default());
        let hook = event(json!({
            "webhookEvent": "jira:issue_updated",
            "timestamp": 2000,
            "user": {"name": "alice", "displayName": "Alice"},
            "issue": {
                "id": "10002",
                "key": "ABC-2",
                "fields": {
                    "summary": "S2",
                    "issuetype": {"name": "Story"},
                    "customfield_10006": "ABC-9",
                    "status": {"name": "Done"}
                }
            },
            "changelog": {"items": [{"field": "status", "fromString": "To Do", "toString": "Done"}]}
        }));

        assert_eq!(
            registry.eligible_actions(&hook),
            vec![
                BotAction::InviteNewMembers,
                BotAction::PostIssueUpdates,
                BotAction::PostEpicUpdates
            ]
        );

        let items = registry.normalize(&hook).unwrap();
        assert!(matches!(items[0], QueueItem::Room(_)));
        let keys: Vec<_> = items
            .iter()
            .filter_map(|item| match item {
                QueueItem::Action(record) => Some(record.redis_key.clone()),
                QueueItem::Room(_) => None,
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                "inviteNewMembers_2000",
                "postIssueUpdates_2000",
                "postEpicUpdates_2000"
            ]
        );
    }

    #[test]
    fn test_same_hook_normalizes_identically() {
        let registry = ParserRegistry::new(Features::default());
        let hook = event(json!({
            "webhookEvent": "comment_created",
            "timestamp": 3000,
            "comment": {
                "id": "7",
                "self": "https://jira.example.com/rest/api/2/issue/10001/comment/7",
                "body": "hello",
                "author": {"name": "bob"}
            }
        }));
        assert_eq!(
            registry.normalize(&hook).unwrap(),
            registry.normalize(&hook).unwrap()
        );
    }

    #[test]
    fn test_links_without_other_issue_still_yield_room_record() {
        let registry = ParserRegistry::new(Features::default());
        let hook = event(json!({
            "webhookEvent": "jira:issue_created",
            "timestamp": 4000,
            "issue": {
                "id": "10001",
                "key": "ABC-1",
                "fields": {
                    "summary": "S",
                    "issuelinks": [{"id": "9", "type": {"name": "Blocks", "inward": "is blocked by", "outward": "blocks"}}]
                }
            }
        }));

        assert!(!registry
            .eligible_actions(&hook)
            .contains(&BotAction::PostNewLinks));
        let items = registry.normalize(&hook).unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], QueueItem::Room(_)));
    }

    #[test]
    fn test_missing_timestamp_is_an_error() {
        let registry = ParserRegistry::new(Features::default());
        let hook = event(json!({
            "webhookEvent": "jira:issue_created",
            "issue": {"id": "1", "key": "ABC-1"}
        }));
        assert_eq!(
            registry.normalize(&hook),
            Err(ParseError::MissingField("timestamp"))
        );
    }

    #[test]
    fn test_disabled_room_creation() {
        let registry = ParserRegistry::new(Features {
            create_room: false,
            ..Features::default()
        });
        let hook = event(json!({
            "webhookEvent": "jira:issue_created",
            "timestamp": 1,
            "issue": {"id": "1", "key": "ABC-1"}
        }));
        assert!(registry.normalize(&hook).unwrap().is_empty());
    }
}
