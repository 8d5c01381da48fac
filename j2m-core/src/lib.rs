//! Core types for the tracker-to-chat bridge.
//!
//! This crate holds everything that both the server and the operator CLI
//! need: the webhook payload model, the queue record types, the key-value
//! storage abstraction with its backends, the durable queue built on top of
//! it, and the capability traits that chat and tracker adapters implement.

pub mod api;
pub mod ignore;
pub mod queue;
pub mod records;
pub mod store;
pub mod webhook;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{
    ChatApi, ChatError, CreateRoomOptions, Issue, Project, RoomId, TrackerApi, TrackerError,
};
pub use ignore::{IgnoreList, IgnoreListStore, ProjectIgnore};
pub use queue::{DurableQueue, EnqueueOutcome, QueueDepth, QueueError};
pub use records::{
    Action, ActionRecord, BotAction, QueueItem, QueueSnapshot, RoomIssue, RoomRecord,
};
pub use store::{InMemoryStore, KeyValueStore, SqliteStore, StoreError};
pub use webhook::{HookType, WebhookEvent};
