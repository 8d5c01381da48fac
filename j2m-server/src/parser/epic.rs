use j2m_core::records::{
    Action, EpicUpdateKind, PostEpicUpdatesData, PostProjectUpdatesData, ProjectUpdateKind,
};
use j2m_core::webhook::{ISSUE_CREATED, ISSUE_UPDATED};
use j2m_core::WebhookEvent;

use super::ParseError;
use crate::config::Features;

/// Whether the hook is a creation or a status change the epic settings
/// care about.
fn is_epic_relevant_change(event: &WebhookEvent, features: &Features) -> bool {
    let settings = &features.epic_updates;
    if !settings.enabled {
        return false;
    }
    match event.event_name() {
        ISSUE_CREATED => settings.new_issues_in_epic,
        ISSUE_UPDATED => settings.issues_status_changed && event.new_status().is_some(),
        _ => false,
    }
}

fn current_status(event: &WebhookEvent) -> Option<String> {
    event.new_status().map(str::to_string).or_else(|| {
        event
            .issue
            .as_ref()
            .and_then(|i| i.fields.status.as_ref())
            .map(|s| s.name.clone())
    })
}

pub(super) fn is_post_epic_updates(event: &WebhookEvent, features: &Features) -> bool {
    let Some(issue) = &event.issue else {
        return false;
    };
    !issue.fields.is_epic()
        && issue
            .fields
            .custom_str(&features.epic_updates.field)
            .is_some()
        && is_epic_relevant_change(event, features)
}

pub(super) fn parse_post_epic_updates(
    event: &WebhookEvent,
    features: &Features,
) -> Result<Action, ParseError> {
    let issue = super::require_issue(event)?;
    let epic_key = issue
        .fields
        .custom_str(&features.epic_updates.field)
        .ok_or(ParseError::MissingField("epic link"))?;

    let kind = if event.event_name() == ISSUE_CREATED {
        EpicUpdateKind::IssueAdded
    } else {
        EpicUpdateKind::StatusChanged
    };

    Ok(Action::PostEpicUpdates(PostEpicUpdatesData {
        epic_key: epic_key.to_string(),
        issue_key: issue.key.clone(),
        summary: issue.fields.summary.clone(),
        kind,
        status: current_status(event),
        author: event.author_label().to_string(),
    }))
}

pub(super) fn is_post_project_updates(event: &WebhookEvent, features: &Features) -> bool {
    let Some(issue) = &event.issue else {
        return false;
    };
    issue.fields.is_epic()
        && issue.fields.project_key().is_some()
        && is_epic_relevant_change(event, features)
}

pub(super) fn parse_post_project_updates(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let issue = super::require_issue(event)?;
    let project_key = issue
        .fields
        .project_key()
        .ok_or(ParseError::MissingField("issue.fields.project"))?;

    let kind = if event.event_name() == ISSUE_CREATED {
        ProjectUpdateKind::EpicCreated
    } else {
        ProjectUpdateKind::EpicStatusChanged
    };

    Ok(Action::PostProjectUpdates(PostProjectUpdatesData {
        project_key: project_key.to_string(),
        epic_key: issue.key.clone(),
        summary: issue.fields.summary.clone(),
        kind,
        status: current_status(event),
        author: event.author_label().to_string(),
    }))
}
