use j2m_core::records::{
    Action, LinkData, LinkEnd, PostLinkedChangesData, PostLinksDeletedData, PostNewLinksData,
};
use j2m_core::webhook::{
    HookIssue, HookIssueLink, ISSUELINK_CREATED, ISSUELINK_DELETED, ISSUE_CREATED, ISSUE_UPDATED,
};
use j2m_core::WebhookEvent;

use super::ParseError;
use crate::config::Features;

/// Whether the issue embeds at least one link naming the other issue.
fn has_links(event: &WebhookEvent) -> bool {
    event
        .issue
        .as_ref()
        .is_some_and(|i| !embedded_links(i).is_empty())
}

/// Links embedded in an issue, oriented from source to destination.
fn embedded_links(issue: &HookIssue) -> Vec<LinkData> {
    let this = || LinkEnd {
        id: issue.id.clone(),
        key: Some(issue.key.clone()),
    };
    issue
        .fields
        .issuelinks
        .iter()
        .filter_map(|link| {
            let (source, destination) = match (&link.outward_issue, &link.inward_issue) {
                (Some(other), _) => (
                    this(),
                    LinkEnd {
                        id: other.id.clone(),
                        key: Some(other.key.clone()),
                    },
                ),
                (None, Some(other)) => (
                    LinkEnd {
                        id: other.id.clone(),
                        key: Some(other.key.clone()),
                    },
                    this(),
                ),
                (None, None) => return None,
            };
            Some(LinkData {
                link_id: link.id.clone(),
                source,
                destination,
                outward: link.link_type.outward.clone(),
                inward: link.link_type.inward.clone(),
            })
        })
        .collect()
}

/// Link payload of an `issuelink_*` hook. Only ids are known here.
fn hook_link(link: &HookIssueLink) -> LinkData {
    LinkData {
        link_id: link.id.to_string(),
        source: LinkEnd {
            id: link.source_issue_id.to_string(),
            key: None,
        },
        destination: LinkEnd {
            id: link.destination_issue_id.to_string(),
            key: None,
        },
        outward: link.issue_link_type.outward_name.clone(),
        inward: link.issue_link_type.inward_name.clone(),
    }
}

pub(super) fn is_post_new_links(event: &WebhookEvent, features: &Features) -> bool {
    if !features.new_links {
        return false;
    }
    match event.event_name() {
        ISSUE_CREATED => has_links(event),
        ISSUELINK_CREATED => event.issue_link.is_some(),
        _ => false,
    }
}

pub(super) fn parse_post_new_links(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let links = if event.event_name() == ISSUELINK_CREATED {
        let link = event
            .issue_link
            .as_ref()
            .ok_or(ParseError::MissingField("issueLink"))?;
        vec![hook_link(link)]
    } else {
        embedded_links(super::require_issue(event)?)
    };

    if links.is_empty() {
        return Err(ParseError::InvalidField {
            field: "issue.fields.issuelinks",
            message: "no link names a linked issue".to_string(),
        });
    }

    Ok(Action::PostNewLinks(PostNewLinksData { links }))
}

pub(super) fn is_post_linked_changes(event: &WebhookEvent, features: &Features) -> bool {
    features.post_changes_to_links
        && event.event_name() == ISSUE_UPDATED
        && event.new_status().is_some()
        && has_links(event)
}

pub(super) fn parse_post_linked_changes(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let issue = super::require_issue(event)?;
    let status = event
        .new_status()
        .ok_or(ParseError::MissingField("status change"))?;

    let mut linked_keys: Vec<String> = issue
        .fields
        .issuelinks
        .iter()
        .filter_map(|link| link.outward_issue.as_ref().or(link.inward_issue.as_ref()))
        .map(|linked| linked.key.clone())
        .collect();
    linked_keys.sort();
    linked_keys.dedup();

    Ok(Action::PostLinkedChanges(PostLinkedChangesData {
        issue_key: issue.key.clone(),
        summary: issue.fields.summary.clone(),
        status: status.to_string(),
        linked_keys,
        author: event.author_label().to_string(),
    }))
}

pub(super) fn is_post_links_deleted(event: &WebhookEvent, features: &Features) -> bool {
    features.new_links
        && event.event_name() == ISSUELINK_DELETED
        && event.issue_link.is_some()
}

pub(super) fn parse_post_links_deleted(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let link = event
        .issue_link
        .as_ref()
        .ok_or(ParseError::MissingField("issueLink"))?;
    Ok(Action::PostLinksDeleted(PostLinksDeletedData {
        link: hook_link(link),
    }))
}
