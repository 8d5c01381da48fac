use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use j2m_core::HookType;

use crate::filter::FilterSettings;

pub const DEFAULT_EPIC_FIELD: &str = "customfield_10006";

#[derive(Clone, Debug)]
pub struct JiraConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct MatrixConfig {
    pub url: String,
    pub token: String,
    /// Server name used to build user ids and room aliases.
    pub domain: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpicUpdates {
    pub enabled: bool,
    pub new_issues_in_epic: bool,
    pub issues_status_changed: bool,
    /// Tracker custom field holding an issue's epic link.
    pub field: String,
}

/// Which bot actions are switched on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Features {
    pub create_room: bool,
    pub invite_new_members: bool,
    pub post_comments: bool,
    pub post_issue_updates: bool,
    pub epic_updates: EpicUpdates,
    pub new_links: bool,
    pub post_changes_to_links: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            create_room: true,
            invite_new_members: true,
            post_comments: true,
            post_issue_updates: true,
            epic_updates: EpicUpdates {
                enabled: true,
                new_issues_in_epic: true,
                issues_status_changed: true,
                field: DEFAULT_EPIC_FIELD.to_string(),
            },
            new_links: true,
            post_changes_to_links: true,
        }
    }
}

impl Features {
    /// Whether any feature acting on hooks of this type is on.
    pub fn any_for(&self, hook_type: HookType) -> bool {
        match hook_type {
            HookType::Issue => {
                self.create_room
                    || self.invite_new_members
                    || self.post_issue_updates
                    || self.epic_updates.enabled
                    || self.new_links
                    || self.post_changes_to_links
            }
            HookType::Comment => self.post_comments,
            HookType::Project => self.create_room,
            HookType::IssueLink => self.new_links,
        }
    }
}

/// Backoff between chat reconnection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before connection attempt number `attempt`. The first attempt
    /// (0) is immediate; retry `n` waits `base * 2^(n-1)`, capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Prefix of every key this deployment writes to the store.
    pub queue_prefix: String,
    pub jira: JiraConfig,
    pub matrix: MatrixConfig,
    /// Optional secret for `X-Hub-Signature` verification.
    /// If not set, webhooks are accepted unsigned.
    pub webhook_secret: Option<String>,
    pub users_to_ignore: Vec<String>,
    /// When set, only hooks caused by these users are processed.
    pub test_mode_users: Option<Vec<String>>,
    pub drain_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub features: Features,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).with_context(|| format!("{} environment variable is required", key))
        };

        let port = get("PORT")
            .unwrap_or_else(|| "4100".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = get("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let queue_prefix = get("QUEUE_PREFIX").unwrap_or_else(|| "j2m:".to_string());

        let jira = JiraConfig {
            url: required("JIRA_URL")?.trim_end_matches('/').to_string(),
            user: required("JIRA_USER")?,
            password: required("JIRA_PASSWORD")?,
        };

        let matrix = MatrixConfig {
            url: required("MATRIX_URL")?.trim_end_matches('/').to_string(),
            token: required("MATRIX_TOKEN")?,
            domain: required("MATRIX_DOMAIN")?,
        };

        let drain_interval = Duration::from_secs(parse_secs(
            get("DRAIN_INTERVAL_SECS"),
            "DRAIN_INTERVAL_SECS",
            60,
        )?);
        if drain_interval.is_zero() {
            return Err(anyhow!("DRAIN_INTERVAL_SECS must be greater than zero"));
        }

        let reconnect = ReconnectPolicy {
            base: Duration::from_secs(parse_secs(
                get("RECONNECT_DELAY_SECS"),
                "RECONNECT_DELAY_SECS",
                5,
            )?),
            max: Duration::from_secs(parse_secs(
                get("RECONNECT_MAX_DELAY_SECS"),
                "RECONNECT_MAX_DELAY_SECS",
                300,
            )?),
        };

        let flag = |key: &'static str| parse_flag(get(key), key);
        let features = Features {
            create_room: flag("FEATURE_CREATE_ROOM")?,
            invite_new_members: flag("FEATURE_INVITE_NEW_MEMBERS")?,
            post_comments: flag("FEATURE_POST_COMMENTS")?,
            post_issue_updates: flag("FEATURE_POST_ISSUE_UPDATES")?,
            epic_updates: EpicUpdates {
                enabled: flag("FEATURE_EPIC_UPDATES")?,
                new_issues_in_epic: flag("FEATURE_EPIC_NEW_ISSUES")?,
                issues_status_changed: flag("FEATURE_EPIC_STATUS_CHANGES")?,
                field: get("EPIC_FIELD").unwrap_or_else(|| DEFAULT_EPIC_FIELD.to_string()),
            },
            new_links: flag("FEATURE_NEW_LINKS")?,
            post_changes_to_links: flag("FEATURE_POST_CHANGES_TO_LINKS")?,
        };

        Ok(Config {
            port,
            state_dir,
            queue_prefix,
            jira,
            matrix,
            webhook_secret: get("WEBHOOK_SECRET"),
            users_to_ignore: parse_list(get("USERS_TO_IGNORE")),
            test_mode_users: get("TEST_MODE_USERS").map(|v| parse_list(Some(v))),
            drain_interval,
            reconnect,
            features,
        })
    }

    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            users_to_ignore: self.users_to_ignore.clone(),
            test_mode_users: self.test_mode_users.clone(),
        }
    }
}

fn parse_secs(value: Option<String>, key: &str, default: u64) -> Result<u64> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a whole number of seconds", key)),
    }
}

/// Feature flags default to on.
fn parse_flag(value: Option<String>, key: &str) -> Result<bool> {
    let Some(value) = value else {
        return Ok(true);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}

fn parse_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("JIRA_URL", "https://jira.example.com/"),
            ("JIRA_USER", "bot"),
            ("JIRA_PASSWORD", "secret"),
            ("MATRIX_URL", "https://matrix.example.com"),
            ("MATRIX_TOKEN", "token"),
            ("MATRIX_DOMAIN", "example.com"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.queue_prefix, "j2m:");
        assert_eq!(config.jira.url, "https://jira.example.com");
        assert_eq!(config.drain_interval, Duration::from_secs(60));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.features, Features::default());
        assert!(config.webhook_secret.is_none());
        assert!(config.test_mode_users.is_none());
    }

    #[test]
    fn test_missing_required_variable() {
        let mut env = base_env();
        env.remove("JIRA_URL");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("JIRA_URL"));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let mut env = base_env();
        env.insert("WEBHOOK_SECRET", "   ");
        env.insert("PORT", "");
        let config = load(&env).unwrap();
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.port, 4100);
    }

    #[test]
    fn test_user_lists_and_flags() {
        let mut env = base_env();
        env.insert("USERS_TO_IGNORE", "bot, jenkins ,,");
        env.insert("TEST_MODE_USERS", "alice");
        env.insert("FEATURE_POST_COMMENTS", "false");
        env.insert("EPIC_FIELD", "customfield_20000");
        let config = load(&env).unwrap();
        assert_eq!(config.users_to_ignore, vec!["bot", "jenkins"]);
        assert_eq!(config.test_mode_users, Some(vec!["alice".to_string()]));
        assert!(!config.features.post_comments);
        assert!(!config.features.any_for(HookType::Comment));
        assert_eq!(config.features.epic_updates.field, "customfield_20000");
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let mut env = base_env();
        env.insert("FEATURE_NEW_LINKS", "maybe");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_reconnect_backoff() {
        let policy = ReconnectPolicy {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(200), Duration::from_secs(60));
    }
}
