//! Hook filter: decides whether an incoming webhook is acted on at all.
//!
//! The filter only reads: it probes the tracker, looks referenced entities
//! up, and consults the persisted ignore list. A failed lookup means the
//! hook is ignored. Only the connectivity probe fails loudly.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use j2m_core::webhook::ISSUE_DELETED;
use j2m_core::{HookType, IgnoreListStore, StoreError, TrackerApi, TrackerError, WebhookEvent};

use crate::config::Features;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("tracker is not reachable: {0}")]
    TrackerUnavailable(#[source] TrackerError),

    #[error("could not read ignore list: {0}")]
    IgnoreList(#[from] StoreError),
}

/// User-based rules.
#[derive(Clone, Debug, Default)]
pub struct FilterSettings {
    pub users_to_ignore: Vec<String>,
    /// When set, every hook not caused by one of these users is ignored.
    pub test_mode_users: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownHookType { event: String },
    FeaturesDisabled(HookType),
    IgnoredUser(String),
    NotATestUser(Option<String>),
    IssueDeleted,
    IssueNotFound(String),
    CommentWithoutIssue,
    ProjectNotFound(String),
    PrivateProject(String),
    LinkedIssuesNotFound,
    IgnoredIssueType { project: String, type_name: String },
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownHookType { event } => write!(f, "unknown hook type '{}'", event),
            Self::FeaturesDisabled(t) => write!(f, "all {} features are disabled", t),
            Self::IgnoredUser(user) => write!(f, "user {} is ignored", user),
            Self::NotATestUser(user) => write!(
                f,
                "test mode is on and {} is not a test user",
                user.as_deref().unwrap_or("anonymous author")
            ),
            Self::IssueDeleted => write!(f, "issue deletion has no bot action"),
            Self::IssueNotFound(id) => write!(f, "issue {} not found", id),
            Self::CommentWithoutIssue => write!(f, "comment does not reference an issue"),
            Self::ProjectNotFound(key) => write!(f, "project {} not found", key),
            Self::PrivateProject(key) => write!(f, "project {} is private", key),
            Self::LinkedIssuesNotFound => write!(f, "neither linked issue exists"),
            Self::IgnoredIssueType { project, type_name } => {
                write!(f, "{} issues are ignored in {}", type_name, project)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Ignore(IgnoreReason),
}

impl FilterVerdict {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore(_))
    }
}

/// Outcome of the per-type entity checks: either a reason to ignore, or the
/// project and issue type to look up in the ignore list.
enum EntityCheck {
    Ignore(IgnoreReason),
    Issue { project: String, type_name: Option<String> },
    Passed,
}

pub struct HookFilter {
    tracker: Arc<dyn TrackerApi>,
    ignore_list: IgnoreListStore,
    features: Features,
    settings: FilterSettings,
}

impl HookFilter {
    pub fn new(
        tracker: Arc<dyn TrackerApi>,
        ignore_list: IgnoreListStore,
        features: Features,
        settings: FilterSettings,
    ) -> Self {
        Self {
            tracker,
            ignore_list,
            features,
            settings,
        }
    }

    pub async fn should_ignore(&self, event: &WebhookEvent) -> Result<bool, FilterError> {
        Ok(self.evaluate(event).await?.is_ignored())
    }

    pub async fn evaluate(&self, event: &WebhookEvent) -> Result<FilterVerdict, FilterError> {
        self.tracker
            .ping()
            .await
            .map_err(FilterError::TrackerUnavailable)?;

        let Some(hook_type) = event.hook_type() else {
            warn!("Ignoring unknown hook type '{}'", event.event_name());
            return Ok(FilterVerdict::Ignore(IgnoreReason::UnknownHookType {
                event: event.event_name().to_string(),
            }));
        };

        if !self.features.any_for(hook_type) {
            return Ok(FilterVerdict::Ignore(IgnoreReason::FeaturesDisabled(
                hook_type,
            )));
        }

        let author = event.author_id();
        if let Some(user) = author {
            if self
                .settings
                .users_to_ignore
                .iter()
                .any(|u| u.eq_ignore_ascii_case(user))
            {
                return Ok(FilterVerdict::Ignore(IgnoreReason::IgnoredUser(
                    user.to_string(),
                )));
            }
        }

        if let Some(test_users) = &self.settings.test_mode_users {
            let allowed = author.is_some_and(|user| {
                test_users.iter().any(|u| u.eq_ignore_ascii_case(user))
            });
            if !allowed {
                return Ok(FilterVerdict::Ignore(IgnoreReason::NotATestUser(
                    author.map(str::to_string),
                )));
            }
        }

        let check = match hook_type {
            HookType::Issue => self.check_issue(event).await,
            HookType::Comment => self.check_comment(event).await,
            HookType::Project => self.check_project(event).await,
            HookType::IssueLink => self.check_issue_link(event).await,
        };

        match check {
            EntityCheck::Ignore(reason) => Ok(FilterVerdict::Ignore(reason)),
            EntityCheck::Passed => Ok(FilterVerdict::Accept),
            EntityCheck::Issue { project, type_name } => {
                let Some(type_name) = type_name else {
                    return Ok(FilterVerdict::Accept);
                };
                let list = self.ignore_list.load().await?;
                if list.is_ignored(&project, &type_name) {
                    info!("Ignoring {} hook for {} issue in {}", hook_type, type_name, project);
                    Ok(FilterVerdict::Ignore(IgnoreReason::IgnoredIssueType {
                        project,
                        type_name,
                    }))
                } else {
                    Ok(FilterVerdict::Accept)
                }
            }
        }
    }

    async fn check_issue(&self, event: &WebhookEvent) -> EntityCheck {
        if event.event_name() == ISSUE_DELETED {
            return EntityCheck::Ignore(IgnoreReason::IssueDeleted);
        }
        let Some(hook_issue) = &event.issue else {
            return EntityCheck::Ignore(IgnoreReason::IssueNotFound(String::new()));
        };
        self.check_existing_issue(&hook_issue.id).await
    }

    async fn check_comment(&self, event: &WebhookEvent) -> EntityCheck {
        match event.comment_issue_id() {
            Some(issue_id) => self.check_existing_issue(&issue_id).await,
            None => EntityCheck::Ignore(IgnoreReason::CommentWithoutIssue),
        }
    }

    /// The issue must exist and must not live in a private next-gen project.
    async fn check_existing_issue(&self, issue_id: &str) -> EntityCheck {
        let Some(issue) = self.tracker.get_issue_safety(issue_id).await else {
            debug!("Issue {} not found in tracker", issue_id);
            return EntityCheck::Ignore(IgnoreReason::IssueNotFound(issue_id.to_string()));
        };

        match self.project_check(&issue.project_key).await {
            EntityCheck::Passed => EntityCheck::Issue {
                project: issue.project_key,
                type_name: issue.type_name,
            },
            other => other,
        }
    }

    async fn check_project(&self, event: &WebhookEvent) -> EntityCheck {
        match &event.project {
            Some(project) => self.project_check(&project.key).await,
            None => EntityCheck::Ignore(IgnoreReason::ProjectNotFound(String::new())),
        }
    }

    async fn project_check(&self, key: &str) -> EntityCheck {
        match self.tracker.get_project(key).await {
            Ok(Some(project)) if project.is_private_next_gen() => {
                EntityCheck::Ignore(IgnoreReason::PrivateProject(key.to_string()))
            }
            Ok(Some(_)) => EntityCheck::Passed,
            Ok(None) => EntityCheck::Ignore(IgnoreReason::ProjectNotFound(key.to_string())),
            Err(e) => {
                warn!("Project lookup for {} failed: {}", key, e);
                EntityCheck::Ignore(IgnoreReason::ProjectNotFound(key.to_string()))
            }
        }
    }

    async fn check_issue_link(&self, event: &WebhookEvent) -> EntityCheck {
        let Some(link) = &event.issue_link else {
            return EntityCheck::Ignore(IgnoreReason::LinkedIssuesNotFound);
        };
        for id in [link.source_issue_id, link.destination_issue_id] {
            if self
                .tracker
                .get_issue_safety(&id.to_string())
                .await
                .is_some()
            {
                return EntityCheck::Passed;
            }
        }
        EntityCheck::Ignore(IgnoreReason::LinkedIssuesNotFound)
    }
}
