//! In-memory implementation of `KeyValueStore`.
//!
//! All data is lost on restart. Used by tests and for throwaway deployments.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyValueStore, StoreError};

/// In-memory key-value store.
///
/// Values are kept in a `BTreeMap` so prefix listing comes out sorted.
/// Lock order is always values, then lists.
#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<BTreeMap<String, String>>,
    lists: RwLock<HashMap<String, VecDeque<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        use std::collections::btree_map::Entry;

        let mut values = self.values.write().await;
        match values.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let values = self.values.read().await;
        let lists = self.lists.read().await;
        Ok(values.contains_key(key) || lists.get(key).is_some_and(|l| !l.is_empty()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut values = self.values.write().await;
        let mut lists = self.lists.write().await;
        let removed_value = values.remove(key).is_some();
        let removed_list = lists.remove(key).is_some();
        Ok(removed_value || removed_list)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let values = self.values.read().await;
        Ok(values
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut lists = self.lists.write().await;
        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let lists = self.lists.read().await;
        Ok(lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_trim_front(&self, key: &str, count: usize) -> Result<(), StoreError> {
        let mut lists = self.lists.write().await;
        if let Some(list) = lists.get_mut(key) {
            let count = count.min(list.len());
            list.drain(..count);
            if list.is_empty() {
                lists.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_get_returns_none_for_missing() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_keeps_first_value() {
        let store = InMemoryStore::new();
        assert!(store.set_if_absent("k", "first").await.unwrap());
        assert!(!store.set_if_absent("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_keys_with_prefix_is_sorted_and_bounded() {
        let store = InMemoryStore::new();
        store.set("p:b", "2").await.unwrap();
        store.set("p:a", "1").await.unwrap();
        store.set("q:a", "3").await.unwrap();
        store.set("o", "0").await.unwrap();

        let keys = store.keys_with_prefix("p:").await.unwrap();
        assert_eq!(keys, vec!["p:a".to_string(), "p:b".to_string()]);
    }

    #[tokio::test]
    async fn test_list_trim_front_keeps_later_entries() {
        let store = InMemoryStore::new();
        store.list_push("rooms", "a").await.unwrap();
        store.list_push("rooms", "b").await.unwrap();
        assert_eq!(store.list_push("rooms", "c").await.unwrap(), 3);

        store.list_trim_front("rooms", 2).await.unwrap();
        assert_eq!(store.list_range("rooms").await.unwrap(), vec!["c"]);

        store.list_trim_front("rooms", 5).await.unwrap();
        assert!(store.list_range("rooms").await.unwrap().is_empty());
        assert!(!store.exists("rooms").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_lists_and_values() {
        let store = InMemoryStore::new();
        store.set("v", "1").await.unwrap();
        store.list_push("l", "1").await.unwrap();

        assert!(store.delete("v").await.unwrap());
        assert!(store.delete("l").await.unwrap());
        assert!(!store.delete("v").await.unwrap());
    }

    proptest! {
        /// Property: after pushing N entries and trimming K, exactly the last
        /// N - K entries remain in push order.
        #[test]
        fn trim_front_preserves_suffix(entries in proptest::collection::vec("[a-z]{1,8}", 0..20), k in 0usize..25) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryStore::new();
                for entry in &entries {
                    store.list_push("l", entry).await.unwrap();
                }
                store.list_trim_front("l", k).await.unwrap();

                let expected: Vec<String> = entries.iter().skip(k).cloned().collect();
                assert_eq!(store.list_range("l").await.unwrap(), expected);
            });
        }
    }
}
