//! Jira REST client implementing [`TrackerApi`].

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::debug;

use j2m_core::{Issue, Project, TrackerApi, TrackerError};

use crate::client::build_http_client;
use crate::config::JiraConfig;

#[derive(Debug, Deserialize)]
struct NamedField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct KeyedField {
    key: String,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraIssueFields {
    #[serde(default)]
    summary: String,
    issuetype: Option<NamedField>,
    project: Option<KeyedField>,
    status: Option<NamedField>,
    priority: Option<NamedField>,
    assignee: Option<JiraUser>,
    reporter: Option<JiraUser>,
    creator: Option<JiraUser>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    id: String,
    key: String,
    fields: JiraIssueFields,
}

impl From<JiraIssue> for Issue {
    fn from(issue: JiraIssue) -> Self {
        let fields = issue.fields;
        let project_key = fields.project.map(|p| p.key).unwrap_or_else(|| {
            issue
                .key
                .split_once('-')
                .map(|(project, _)| project.to_string())
                .unwrap_or_default()
        });
        Issue {
            id: issue.id,
            key: issue.key,
            summary: fields.summary,
            type_name: fields.issuetype.map(|t| t.name),
            project_key,
            status: fields.status.map(|s| s.name),
            assignee: fields.assignee.and_then(|u| u.name),
            reporter: fields.reporter.and_then(|u| u.name),
            creator: fields.creator.and_then(|u| u.name),
            description: fields.description,
            priority: fields.priority.map(|p| p.name),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraProject {
    id: String,
    key: String,
    name: String,
    lead: Option<JiraUser>,
    #[serde(default)]
    is_private: bool,
    style: Option<String>,
}

impl From<JiraProject> for Project {
    fn from(project: JiraProject) -> Self {
        Project {
            key: project.key,
            id: project.id,
            name: project.name,
            lead: project.lead.and_then(|u| u.name),
            is_private: project.is_private,
            style: project.style,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JiraWatchers {
    #[serde(default)]
    watchers: Vec<JiraUser>,
}

#[derive(Clone)]
pub struct JiraClient {
    client: ClientWithMiddleware,
    base_url: String,
    user: String,
    password: String,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Self {
        Self {
            client: build_http_client(),
            base_url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.base_url, path)
    }

    /// GET a REST resource. `Ok(None)` on 404.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<Option<T>, TrackerError> {
        let response = self
            .client
            .get(self.api(path))
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TrackerError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Tracker {} returned 404 for {}", operation, path);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TrackerError::Status {
                operation,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| TrackerError::Decode {
                what: operation,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl TrackerApi for JiraClient {
    async fn ping(&self) -> Result<(), TrackerError> {
        match self.get_json::<serde_json::Value>("myself", "myself").await? {
            Some(_) => Ok(()),
            None => Err(TrackerError::Status {
                operation: "myself",
                status: StatusCode::NOT_FOUND.as_u16(),
            }),
        }
    }

    async fn get_issue(&self, id_or_key: &str) -> Result<Option<Issue>, TrackerError> {
        Ok(self
            .get_json::<JiraIssue>("issue", &format!("issue/{}", id_or_key))
            .await?
            .map(Issue::from))
    }

    async fn get_project(&self, key: &str) -> Result<Option<Project>, TrackerError> {
        Ok(self
            .get_json::<JiraProject>("project", &format!("project/{}", key))
            .await?
            .map(Project::from))
    }

    async fn get_issue_watchers(&self, key: &str) -> Result<Vec<String>, TrackerError> {
        let watchers = self
            .get_json::<JiraWatchers>("watchers", &format!("issue/{}/watchers", key))
            .await?;
        Ok(watchers
            .map(|w| w.watchers.into_iter().filter_map(|u| u.name).collect())
            .unwrap_or_default())
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_conversion() {
        let raw = json!({
            "id": "10001",
            "key": "ABC-1",
            "fields": {
                "summary": "Broken build",
                "issuetype": { "name": "Bug" },
                "project": { "key": "ABC", "name": "Alphabet" },
                "status": { "name": "In Progress" },
                "assignee": { "name": "alice", "displayName": "Alice" },
                "reporter": { "name": "bob" },
                "creator": null,
                "description": "It fails",
                "priority": { "name": "High" }
            }
        });
        let issue: Issue = serde_json::from_value::<JiraIssue>(raw).unwrap().into();
        assert_eq!(issue.key, "ABC-1");
        assert_eq!(issue.project_key, "ABC");
        assert_eq!(issue.type_name.as_deref(), Some("Bug"));
        assert_eq!(issue.status.as_deref(), Some("In Progress"));
        assert_eq!(issue.assignee.as_deref(), Some("alice"));
        assert_eq!(issue.creator, None);
        assert_eq!(issue.priority.as_deref(), Some("High"));
    }

    #[test]
    fn test_issue_without_project_uses_key_prefix() {
        let raw = json!({ "id": "7", "key": "XY-42", "fields": { "summary": "s" } });
        let issue: Issue = serde_json::from_value::<JiraIssue>(raw).unwrap().into();
        assert_eq!(issue.project_key, "XY");
        assert_eq!(issue.type_name, None);
    }

    #[test]
    fn test_project_conversion() {
        let raw = json!({
            "id": "100",
            "key": "NG",
            "name": "Next gen",
            "lead": { "name": "carol" },
            "isPrivate": true,
            "style": "next-gen"
        });
        let project: Project = serde_json::from_value::<JiraProject>(raw).unwrap().into();
        assert!(project.is_private_next_gen());
        assert_eq!(project.lead.as_deref(), Some("carol"));
    }

    #[test]
    fn test_issue_url_trims_trailing_slash() {
        let client = JiraClient::new(&JiraConfig {
            url: "https://jira.example.com/".to_string(),
            user: "bot".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(
            client.issue_url("ABC-1"),
            "https://jira.example.com/browse/ABC-1"
        );
    }
}
