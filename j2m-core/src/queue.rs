//! The durable queue of room and action records.
//!
//! Records are persisted in a [`KeyValueStore`] under a per-deployment
//! prefix:
//!
//! - `<prefix>rooms` holds the list of room records, oldest first.
//! - `<prefix>action:<redisKey>` holds one action record each.
//!
//! Draining is a read-then-delete: [`DurableQueue::snapshot`] reads
//! everything, and the dispatcher removes each record only after it has
//! been handled. A crash in between means the record is delivered again.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::records::{ActionRecord, QueueItem, QueueSnapshot, RoomRecord};
use crate::store::{KeyValueStore, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize queue record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What `enqueue` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    RoomAppended,
    ActionStored,
    /// An action with the same key is already queued; nothing was written.
    DuplicateAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueDepth {
    pub rooms: usize,
    pub actions: usize,
}

#[derive(Clone)]
pub struct DurableQueue {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn rooms_key(&self) -> String {
        format!("{}rooms", self.prefix)
    }

    fn actions_prefix(&self) -> String {
        format!("{}action:", self.prefix)
    }

    pub fn action_key(&self, redis_key: &str) -> String {
        format!("{}{}", self.actions_prefix(), redis_key)
    }

    pub async fn enqueue(&self, item: &QueueItem) -> Result<EnqueueOutcome, QueueError> {
        match item {
            QueueItem::Room(room) => {
                let json = serde_json::to_string(room)?;
                let len = self.store.list_push(&self.rooms_key(), &json).await?;
                debug!("Appended room record, {} room(s) queued", len);
                Ok(EnqueueOutcome::RoomAppended)
            }
            QueueItem::Action(record) => {
                let json = serde_json::to_string(record)?;
                let written = self
                    .store
                    .set_if_absent(&self.action_key(&record.redis_key), &json)
                    .await?;
                if written {
                    debug!("Stored action record {}", record.redis_key);
                    Ok(EnqueueOutcome::ActionStored)
                } else {
                    debug!("Action record {} already queued", record.redis_key);
                    Ok(EnqueueOutcome::DuplicateAction)
                }
            }
        }
    }

    /// Append a room intent for the next drain.
    pub async fn requeue_room(&self, record: &RoomRecord) -> Result<(), QueueError> {
        self.enqueue(&QueueItem::Room(record.clone())).await?;
        Ok(())
    }

    /// Read everything currently queued.
    ///
    /// Undecodable room entries are counted in `rooms_read` but skipped, so
    /// they are trimmed along with the rest. Undecodable action records are
    /// reported in `corrupt_keys`.
    pub async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let raw_rooms = self.store.list_range(&self.rooms_key()).await?;
        let rooms_read = raw_rooms.len();
        let mut rooms = Vec::with_capacity(rooms_read);
        for raw in raw_rooms {
            match serde_json::from_str::<RoomRecord>(&raw) {
                Ok(room) if !room.is_empty() => rooms.push(room),
                Ok(_) => warn!("Skipping empty room record"),
                Err(e) => warn!("Skipping unreadable room record: {}", e),
            }
        }

        let actions_prefix = self.actions_prefix();
        let mut actions = Vec::new();
        let mut corrupt_keys = Vec::new();
        for key in self.store.keys_with_prefix(&actions_prefix).await? {
            let redis_key = &key[actions_prefix.len()..];
            let Some(raw) = self.store.get(&key).await? else {
                // Removed between listing and reading.
                continue;
            };
            match serde_json::from_str::<ActionRecord>(&raw) {
                Ok(record) if record.redis_key == redis_key => actions.push(record),
                Ok(record) => {
                    warn!(
                        "Action record under {} claims key {}, treating as corrupt",
                        redis_key, record.redis_key
                    );
                    corrupt_keys.push(redis_key.to_string());
                }
                Err(e) => {
                    warn!("Unreadable action record {}: {}", redis_key, e);
                    corrupt_keys.push(redis_key.to_string());
                }
            }
        }

        actions.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.action.kind().cmp(&b.action.kind()))
        });

        Ok(QueueSnapshot {
            rooms,
            rooms_read,
            actions,
            corrupt_keys,
        })
    }

    /// Remove the `count` oldest room entries (those read by a snapshot).
    pub async fn remove_rooms(&self, count: usize) -> Result<(), QueueError> {
        if count == 0 {
            return Ok(());
        }
        self.store.list_trim_front(&self.rooms_key(), count).await?;
        Ok(())
    }

    /// Delete one action record. Returns whether it was present.
    pub async fn remove_action(&self, redis_key: &str) -> Result<bool, QueueError> {
        Ok(self.store.delete(&self.action_key(redis_key)).await?)
    }

    pub async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let rooms = self.store.list_range(&self.rooms_key()).await?.len();
        let actions = self
            .store
            .keys_with_prefix(&self.actions_prefix())
            .await?
            .len();
        Ok(QueueDepth { rooms, actions })
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        let depth = self.depth().await?;
        Ok(depth.rooms == 0 && depth.actions == 0)
    }

    /// Drop every queued record. Returns how many were removed.
    pub async fn purge(&self) -> Result<usize, QueueError> {
        let depth = self.depth().await?;
        self.store.delete(&self.rooms_key()).await?;
        for key in self.store.keys_with_prefix(&self.actions_prefix()).await? {
            self.store.delete(&key).await?;
        }
        Ok(depth.rooms + depth.actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{
        Action, InviteNewMembersData, PostCommentData, QueueItem, RoomRecord,
    };
    use crate::store::InMemoryStore;
    use proptest::prelude::*;

    fn queue() -> (Arc<InMemoryStore>, DurableQueue) {
        let store = Arc::new(InMemoryStore::new());
        let queue = DurableQueue::new(store.clone(), "test:");
        (store, queue)
    }

    fn invite(key: &str, ts: i64) -> QueueItem {
        QueueItem::Action(ActionRecord::new(
            Action::InviteNewMembers(InviteNewMembersData {
                issue_key: key.to_string(),
            }),
            ts,
        ))
    }

    fn comment(ts: i64) -> QueueItem {
        QueueItem::Action(ActionRecord::new(
            Action::PostComment(PostCommentData {
                issue_id: "10001".to_string(),
                issue_key: Some("ABC-1".to_string()),
                header_text: "Alice commented".to_string(),
                comment_id: "1".to_string(),
                body: "hi".to_string(),
                author: "Alice".to_string(),
            }),
            ts,
        ))
    }

    #[tokio::test]
    async fn test_duplicate_action_is_stored_once() {
        let (_, queue) = queue();
        assert_eq!(
            queue.enqueue(&invite("ABC-1", 5)).await.unwrap(),
            EnqueueOutcome::ActionStored
        );
        assert_eq!(
            queue.enqueue(&invite("ABC-1", 5)).await.unwrap(),
            EnqueueOutcome::DuplicateAction
        );

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_rooms_accumulate_as_list() {
        let (_, queue) = queue();
        let room = QueueItem::Room(RoomRecord::for_issue_key("ABC-1"));
        queue.enqueue(&room).await.unwrap();
        queue.enqueue(&room).await.unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot.rooms.len(), 2);
        assert_eq!(snapshot.rooms_read, 2);
        assert_eq!(queue.depth().await.unwrap(), QueueDepth { rooms: 2, actions: 0 });
    }

    #[tokio::test]
    async fn test_snapshot_orders_actions_by_timestamp_then_kind() {
        let (_, queue) = queue();
        queue.enqueue(&comment(20)).await.unwrap();
        queue.enqueue(&comment(10)).await.unwrap();
        queue.enqueue(&invite("ABC-1", 20)).await.unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        let keys: Vec<_> = snapshot.actions.iter().map(|a| a.redis_key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["postComment_10", "inviteNewMembers_20", "postComment_20"]
        );
    }

    #[tokio::test]
    async fn test_rooms_appended_after_snapshot_survive_removal() {
        let (_, queue) = queue();
        queue
            .enqueue(&QueueItem::Room(RoomRecord::for_issue_key("ABC-1")))
            .await
            .unwrap();
        let snapshot = queue.snapshot().await.unwrap();

        queue
            .enqueue(&QueueItem::Room(RoomRecord::for_issue_key("ABC-2")))
            .await
            .unwrap();
        queue.remove_rooms(snapshot.rooms_read).await.unwrap();

        let after = queue.snapshot().await.unwrap();
        assert_eq!(after.rooms, vec![RoomRecord::for_issue_key("ABC-2")]);
    }

    #[tokio::test]
    async fn test_corrupt_records_are_reported() {
        let (store, queue) = queue();
        store.set("test:action:postComment_1", "not json").await.unwrap();
        store.list_push("test:rooms", "{broken").await.unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot.corrupt_keys, vec!["postComment_1".to_string()]);
        assert!(snapshot.rooms.is_empty());
        assert_eq!(snapshot.rooms_read, 1);
        assert!(!snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_purge_empties_queue_and_leaves_other_keys() {
        let (store, queue) = queue();
        store.set("test:ignore-list", "{}").await.unwrap();
        queue.enqueue(&comment(1)).await.unwrap();
        queue
            .enqueue(&QueueItem::Room(RoomRecord::for_project("ABC")))
            .await
            .unwrap();

        assert_eq!(queue.purge().await.unwrap(), 2);
        assert!(queue.is_empty().await.unwrap());
        assert!(store.exists("test:ignore-list").await.unwrap());
    }

    proptest! {
        /// Property: however often an action is delivered, exactly one record
        /// per (funcName, timestamp) is stored.
        #[test]
        fn enqueue_is_idempotent(timestamps in proptest::collection::vec(0i64..5, 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (_, queue) = queue();
                for ts in &timestamps {
                    queue.enqueue(&invite("ABC-1", *ts)).await.unwrap();
                }

                let mut distinct = timestamps.clone();
                distinct.sort_unstable();
                distinct.dedup();

                let snapshot = queue.snapshot().await.unwrap();
                let stored: Vec<i64> = snapshot
                    .actions
                    .iter()
                    .filter_map(ActionRecord::timestamp)
                    .collect();
                assert_eq!(stored, distinct);
            });
        }
    }
}
