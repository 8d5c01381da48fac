use j2m_core::records::{Action, FieldChange, InviteNewMembersData, PostIssueUpdatesData};
use j2m_core::webhook::ISSUE_UPDATED;
use j2m_core::WebhookEvent;

use super::ParseError;
use crate::config::Features;

pub(super) fn is_invite_new_members(event: &WebhookEvent, features: &Features) -> bool {
    features.invite_new_members && event.event_name() == ISSUE_UPDATED && event.issue.is_some()
}

pub(super) fn parse_invite_new_members(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let issue = super::require_issue(event)?;
    Ok(Action::InviteNewMembers(InviteNewMembersData {
        issue_key: issue.key.clone(),
    }))
}

pub(super) fn is_post_issue_updates(event: &WebhookEvent, features: &Features) -> bool {
    features.post_issue_updates
        && event.event_name() == ISSUE_UPDATED
        && event.issue.is_some()
        && !event.changelog_items().is_empty()
}

pub(super) fn parse_post_issue_updates(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let issue = super::require_issue(event)?;
    let changes = event
        .changelog_items()
        .iter()
        .map(|item| FieldChange {
            field: item.field.clone(),
            from: item.from_text.clone(),
            to: item.to_text.clone(),
        })
        .collect();

    Ok(Action::PostIssueUpdates(PostIssueUpdatesData {
        issue_key: issue.key.clone(),
        summary: issue.fields.summary.clone(),
        author: event.author_label().to_string(),
        changes,
        new_summary: event
            .change_of("summary")
            .and_then(|c| c.to_text.clone()),
        new_status: event.new_status().map(str::to_string),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_update_carries_changes() {
        let hook: WebhookEvent = serde_json::from_value(json!({
            "webhookEvent": "jira:issue_updated",
            "timestamp": 9,
            "user": {"name": "alice", "displayName": "Alice"},
            "issue": {"id": "1", "key": "ABC-1", "fields": {"summary": "Renamed"}},
            "changelog": {"items": [
                {"field": "summary", "fromString": "Old", "toString": "Renamed"},
                {"field": "assignee", "fromString": null, "toString": "Bob"}
            ]}
        }))
        .unwrap();

        assert!(is_post_issue_updates(&hook, &Features::default()));
        let Action::PostIssueUpdates(data) =
            parse_post_issue_updates(&hook, &Features::default()).unwrap()
        else {
            panic!("expected postIssueUpdates");
        };
        assert_eq!(data.author, "Alice");
        assert_eq!(data.new_summary.as_deref(), Some("Renamed"));
        assert_eq!(data.new_status, None);
        assert_eq!(data.changes.len(), 2);
        assert_eq!(data.changes[1].to.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_update_without_changelog_posts_nothing() {
        let hook: WebhookEvent = serde_json::from_value(json!({
            "webhookEvent": "jira:issue_updated",
            "timestamp": 9,
            "issue": {"id": "1", "key": "ABC-1"}
        }))
        .unwrap();

        assert!(!is_post_issue_updates(&hook, &Features::default()));
        assert!(is_invite_new_members(&hook, &Features::default()));
    }
}
