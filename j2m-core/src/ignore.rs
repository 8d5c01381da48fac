//! Manually configured per-project ignore rules.
//!
//! The list is a single JSON document stored under `<prefix>ignore-list`:
//!
//! ```json
//! { "ABC": { "taskType": ["Sub-task"], "admins": ["alice"] } }
//! ```
//!
//! The server only reads it. Operators edit it through the CLI.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{KeyValueStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIgnore {
    #[serde(default)]
    pub task_type: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreList(pub BTreeMap<String, ProjectIgnore>);

impl IgnoreList {
    /// Whether issues of `type_name` in `project` are ignored. Issue type
    /// names are compared case-insensitively.
    pub fn is_ignored(&self, project: &str, type_name: &str) -> bool {
        self.0.get(project).is_some_and(|rules| {
            rules
                .task_type
                .iter()
                .any(|t| t.eq_ignore_ascii_case(type_name))
        })
    }

    pub fn project(&self, project: &str) -> Option<&ProjectIgnore> {
        self.0.get(project)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone)]
pub struct IgnoreListStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl IgnoreListStore {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &str) -> Self {
        Self {
            store,
            key: format!("{}ignore-list", prefix),
        }
    }

    pub async fn load(&self) -> Result<IgnoreList, StoreError> {
        match self.store.get(&self.key).await? {
            None => Ok(IgnoreList::default()),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StoreError::corruption(format!("ignore list: {}", e))),
        }
    }

    pub async fn save(&self, list: &IgnoreList) -> Result<(), StoreError> {
        let raw = serde_json::to_string(list)
            .map_err(|e| StoreError::storage("serialize ignore list", e.to_string()))?;
        self.store.set(&self.key, &raw).await
    }

    /// Add issue types to a project's rules. Returns the project's updated rules.
    pub async fn add_task_types(
        &self,
        project: &str,
        types: &[String],
    ) -> Result<ProjectIgnore, StoreError> {
        let mut list = self.load().await?;
        let rules = list.0.entry(project.to_string()).or_default();
        for t in types {
            if !rules.task_type.iter().any(|known| known.eq_ignore_ascii_case(t)) {
                rules.task_type.push(t.clone());
            }
        }
        let updated = rules.clone();
        self.save(&list).await?;
        Ok(updated)
    }

    /// Remove issue types from a project's rules. A project left with no
    /// rules at all is dropped from the list.
    pub async fn remove_task_types(
        &self,
        project: &str,
        types: &[String],
    ) -> Result<Option<ProjectIgnore>, StoreError> {
        let mut list = self.load().await?;
        let Some(rules) = list.0.get_mut(project) else {
            return Ok(None);
        };
        rules
            .task_type
            .retain(|known| !types.iter().any(|t| t.eq_ignore_ascii_case(known)));
        let updated = if rules.task_type.is_empty() && rules.admins.is_empty() {
            list.0.remove(project);
            None
        } else {
            Some(rules.clone())
        };
        self.save(&list).await?;
        Ok(updated)
    }

    /// Drop all rules of a project. Returns whether it had any.
    pub async fn clear_project(&self, project: &str) -> Result<bool, StoreError> {
        let mut list = self.load().await?;
        let removed = list.0.remove(project).is_some();
        if removed {
            self.save(&list).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn store() -> (Arc<InMemoryStore>, IgnoreListStore) {
        let kv = Arc::new(InMemoryStore::new());
        (kv.clone(), IgnoreListStore::new(kv, "j2m:"))
    }

    #[tokio::test]
    async fn test_missing_list_is_empty() {
        let (_, store) = store();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_existing_document() {
        let (kv, store) = store();
        kv.set(
            "j2m:ignore-list",
            r#"{"ABC":{"taskType":["Sub-task"],"admins":["alice"]}}"#,
        )
        .await
        .unwrap();

        let list = store.load().await.unwrap();
        assert!(list.is_ignored("ABC", "sub-task"));
        assert!(!list.is_ignored("ABC", "Story"));
        assert!(!list.is_ignored("XYZ", "Sub-task"));
        assert_eq!(list.project("ABC").unwrap().admins, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let (kv, store) = store();
        kv.set("j2m:ignore-list", "[1,2").await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(StoreError::Corruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_and_remove_task_types() {
        let (_, store) = store();
        let types = vec!["Bug".to_string(), "bug".to_string(), "Task".to_string()];
        let rules = store.add_task_types("ABC", &types).await.unwrap();
        assert_eq!(rules.task_type, vec!["Bug", "Task"]);

        let rules = store
            .remove_task_types("ABC", &["BUG".to_string()])
            .await
            .unwrap();
        assert_eq!(rules.unwrap().task_type, vec!["Task"]);

        let rules = store
            .remove_task_types("ABC", &["Task".to_string()])
            .await
            .unwrap();
        assert!(rules.is_none());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_project() {
        let (_, store) = store();
        store
            .add_task_types("ABC", &["Bug".to_string()])
            .await
            .unwrap();
        assert!(store.clear_project("ABC").await.unwrap());
        assert!(!store.clear_project("ABC").await.unwrap());
    }
}
