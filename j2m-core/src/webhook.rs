//! Tracker webhook payload model.
//!
//! Only the attributes the bridge consumes are modelled. Unknown fields are
//! ignored by serde, and every top-level object is optional so that a
//! malformed or unfamiliar hook still deserializes and can be classified
//! (and ignored) by the hook filter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const ISSUE_CREATED: &str = "jira:issue_created";
pub const ISSUE_UPDATED: &str = "jira:issue_updated";
pub const ISSUE_DELETED: &str = "jira:issue_deleted";
pub const COMMENT_CREATED: &str = "comment_created";
pub const COMMENT_UPDATED: &str = "comment_updated";
pub const PROJECT_CREATED: &str = "project_created";
pub const ISSUELINK_CREATED: &str = "issuelink_created";
pub const ISSUELINK_DELETED: &str = "issuelink_deleted";

/// Family of a webhook, derived from its `webhookEvent` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
    Issue,
    Comment,
    Project,
    IssueLink,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue => write!(f, "issue"),
            Self::Comment => write!(f, "comment"),
            Self::Project => write!(f, "project"),
            Self::IssueLink => write!(f, "issuelink"),
        }
    }
}

/// An inbound tracker webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub webhook_event: Option<String>,
    /// Milliseconds since the epoch, as sent by the tracker.
    pub timestamp: Option<i64>,
    #[serde(rename = "issue_event_type_name")]
    pub issue_event_type_name: Option<String>,
    pub user: Option<HookUser>,
    pub issue: Option<HookIssue>,
    pub comment: Option<HookComment>,
    pub project: Option<HookProject>,
    pub issue_link: Option<HookIssueLink>,
    pub changelog: Option<Changelog>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookUser {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub account_id: Option<String>,
}

impl HookUser {
    /// Stable identifier: the user name on server deployments, the account id on cloud.
    pub fn id(&self) -> Option<&str> {
        self.name.as_deref().or(self.account_id.as_deref())
    }

    /// Human-readable name, falling back to the identifier.
    pub fn label(&self) -> Option<&str> {
        self.display_name.as_deref().or_else(|| self.id())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedField {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub key: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookIssue {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub fields: IssueFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
    pub summary: Option<String>,
    pub issuetype: Option<NamedField>,
    pub project: Option<ProjectRef>,
    pub status: Option<NamedField>,
    pub priority: Option<NamedField>,
    pub assignee: Option<HookUser>,
    pub reporter: Option<HookUser>,
    pub creator: Option<HookUser>,
    pub description: Option<String>,
    #[serde(default)]
    pub issuelinks: Vec<IssueLinkField>,
    /// Custom fields (epic link and friends) keyed by their field id.
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl IssueFields {
    pub fn type_name(&self) -> Option<&str> {
        self.issuetype.as_ref().map(|t| t.name.as_str())
    }

    pub fn project_key(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.key.as_str())
    }

    pub fn is_epic(&self) -> bool {
        self.type_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("epic"))
    }

    /// Value of a string custom field, e.g. the epic link.
    pub fn custom_str(&self, field: &str) -> Option<&str> {
        self.custom
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// A link as embedded in an issue's `issuelinks` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLinkField {
    pub id: String,
    #[serde(rename = "type")]
    pub link_type: LinkTypeField,
    pub inward_issue: Option<LinkedIssue>,
    pub outward_issue: Option<LinkedIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTypeField {
    pub name: Option<String>,
    pub inward: String,
    pub outward: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIssue {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookComment {
    pub id: String,
    #[serde(rename = "self")]
    pub self_url: Option<String>,
    pub body: Option<String>,
    pub author: Option<HookUser>,
    pub update_author: Option<HookUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookProject {
    pub key: String,
    pub name: Option<String>,
}

/// Link payload of `issuelink_*` hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookIssueLink {
    pub id: i64,
    pub source_issue_id: i64,
    pub destination_issue_id: i64,
    pub issue_link_type: HookLinkType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookLinkType {
    pub name: Option<String>,
    pub outward_name: String,
    pub inward_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
    pub id: Option<String>,
    #[serde(default)]
    pub items: Vec<ChangelogItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogItem {
    pub field: String,
    pub fieldtype: Option<String>,
    #[serde(rename = "fromString")]
    pub from_text: Option<String>,
    #[serde(rename = "toString")]
    pub to_text: Option<String>,
}

impl WebhookEvent {
    pub fn event_name(&self) -> &str {
        self.webhook_event.as_deref().unwrap_or("")
    }

    /// Classify the hook from its discriminator, confirmed by the presence of
    /// the matching payload object. Returns `None` for anything unrecognised.
    pub fn hook_type(&self) -> Option<HookType> {
        let name = self.event_name();
        if name.starts_with("jira:issue_") && self.issue.is_some() {
            Some(HookType::Issue)
        } else if name.starts_with("comment_") && self.comment.is_some() {
            Some(HookType::Comment)
        } else if name.starts_with("project_") && self.project.is_some() {
            Some(HookType::Project)
        } else if name.starts_with("issuelink_") && self.issue_link.is_some() {
            Some(HookType::IssueLink)
        } else {
            None
        }
    }

    /// Identifier of the user who caused the hook.
    pub fn author_id(&self) -> Option<&str> {
        if let Some(comment) = &self.comment {
            let author = comment.update_author.as_ref().or(comment.author.as_ref());
            if let Some(id) = author.and_then(HookUser::id) {
                return Some(id);
            }
        }
        self.user.as_ref().and_then(HookUser::id)
    }

    /// Display name of the user who caused the hook.
    pub fn author_label(&self) -> &str {
        if let Some(comment) = &self.comment {
            let author = comment.update_author.as_ref().or(comment.author.as_ref());
            if let Some(label) = author.and_then(HookUser::label) {
                return label;
            }
        }
        self.user
            .as_ref()
            .and_then(HookUser::label)
            .unwrap_or("unknown")
    }

    /// Issue id a comment hook refers to, parsed from the comment's REST URL
    /// (`.../rest/api/2/issue/<issue-id>/comment/<comment-id>`).
    pub fn comment_issue_id(&self) -> Option<String> {
        if let Some(issue) = &self.issue {
            return Some(issue.id.clone());
        }
        let url = self.comment.as_ref()?.self_url.as_deref()?;
        let mut segments = url.split('/');
        segments.find(|s| *s == "issue")?;
        segments
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    pub fn changelog_items(&self) -> &[ChangelogItem] {
        self.changelog
            .as_ref()
            .map(|c| c.items.as_slice())
            .unwrap_or(&[])
    }

    /// The changelog item for a given field, if it changed.
    pub fn change_of(&self, field: &str) -> Option<&ChangelogItem> {
        self.changelog_items()
            .iter()
            .find(|item| item.field.eq_ignore_ascii_case(field))
    }

    /// New status name, when this hook changed the issue status.
    pub fn new_status(&self) -> Option<&str> {
        self.change_of("status").and_then(|c| c.to_text.as_deref())
    }
}
