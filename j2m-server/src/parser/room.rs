use j2m_core::records::{DescriptionFields, RoomIssue, RoomRecord};
use j2m_core::webhook::{HookUser, ISSUE_CREATED, ISSUE_UPDATED, PROJECT_CREATED};
use j2m_core::WebhookEvent;

use super::ParseError;
use crate::config::Features;

pub(super) fn is_create_room(event: &WebhookEvent, features: &Features) -> bool {
    if !features.create_room {
        return false;
    }
    match event.event_name() {
        ISSUE_CREATED | ISSUE_UPDATED => event.issue.is_some(),
        PROJECT_CREATED => event.project.is_some(),
        _ => false,
    }
}

/// Room intent for an issue hook, or for a new project. Epics also ask for
/// their project's room.
pub(super) fn parse_create_room(
    event: &WebhookEvent,
    features: &Features,
) -> Result<RoomRecord, ParseError> {
    if event.event_name() == PROJECT_CREATED {
        let project = event
            .project
            .as_ref()
            .ok_or(ParseError::MissingField("project"))?;
        return Ok(RoomRecord::for_project(project.key.clone()));
    }

    let issue = super::require_issue(event)?;
    if issue.key.is_empty() {
        return Err(ParseError::InvalidField {
            field: "issue.key",
            message: "empty issue key".to_string(),
        });
    }

    let fields = &issue.fields;
    let name_of = |user: &Option<HookUser>| {
        user.as_ref()
            .and_then(HookUser::label)
            .map(str::to_string)
    };

    let description_fields = DescriptionFields {
        assignee_name: name_of(&fields.assignee),
        reporter_name: name_of(&fields.reporter),
        type_name: fields.type_name().map(str::to_string),
        epic_link: fields
            .custom_str(&features.epic_updates.field)
            .map(str::to_string),
        priority: fields.priority.as_ref().map(|p| p.name.clone()),
        status: fields.status.as_ref().map(|s| s.name.clone()),
        description: fields.description.clone(),
    };

    let project_key = fields.project_key().map(str::to_string);
    Ok(RoomRecord {
        issue: Some(RoomIssue {
            key: issue.key.clone(),
            id: Some(issue.id.clone()),
            summary: fields.summary.clone(),
            description_fields: Some(description_fields),
            project_key: project_key.clone(),
        }),
        project_key: if fields.is_epic() { project_key } else { None },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_epic_room_also_requests_project_room() {
        let hook = event(json!({
            "webhookEvent": "jira:issue_created",
            "timestamp": 1,
            "issue": {
                "id": "10",
                "key": "ABC-10",
                "fields": {
                    "summary": "Big epic",
                    "issuetype": {"name": "Epic"},
                    "project": {"key": "ABC"},
                    "assignee": {"name": "alice", "displayName": "Alice"},
                    "priority": {"name": "High"}
                }
            }
        }));

        let record = parse_create_room(&hook, &Features::default()).unwrap();
        assert_eq!(record.project_key.as_deref(), Some("ABC"));
        let issue = record.issue.unwrap();
        assert_eq!(issue.project_key.as_deref(), Some("ABC"));
        let fields = issue.description_fields.unwrap();
        assert_eq!(fields.assignee_name.as_deref(), Some("Alice"));
        assert_eq!(fields.priority.as_deref(), Some("High"));
    }

    #[test]
    fn test_project_created_room() {
        let hook = event(json!({
            "webhookEvent": "project_created",
            "timestamp": 1,
            "project": {"key": "NEW", "name": "New project"}
        }));
        assert!(is_create_room(&hook, &Features::default()));
        assert_eq!(
            parse_create_room(&hook, &Features::default()).unwrap(),
            RoomRecord::for_project("NEW")
        );
    }

    #[test]
    fn test_comment_hooks_do_not_create_rooms() {
        let hook = event(json!({
            "webhookEvent": "comment_created",
            "timestamp": 1,
            "issue": {"id": "1", "key": "ABC-1"},
            "comment": {"id": "1"}
        }));
        assert!(!is_create_room(&hook, &Features::default()));
    }
}
