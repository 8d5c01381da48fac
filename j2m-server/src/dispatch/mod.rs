//! Dispatcher: replays a drained batch against the chat backend.
//!
//! Rooms are ensured first, then each action record is run through its
//! handler. A record is removed from the queue when its handler succeeds
//! or fails for good. A record whose room is missing is kept, and the room
//! intent is re-queued so the next drain creates it. When the chat
//! connection drops or the tracker is unreachable the pass stops and every
//! record not yet handled stays queued.

mod actions;
mod rooms;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use j2m_core::{
    ChatApi, ChatError, DurableQueue, QueueError, QueueSnapshot, RoomRecord, TrackerApi,
    TrackerError,
};

pub use rooms::RoomOutcome;

/// The room an action needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    Issue(String),
    Project(String),
}

impl RoomTarget {
    pub fn to_room_record(&self) -> RoomRecord {
        match self {
            Self::Issue(key) => RoomRecord::for_issue_key(key.clone()),
            Self::Project(key) => RoomRecord::for_project(key.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The target room does not exist yet. The record is kept.
    #[error("no room for {target:?}")]
    RoomMissing { target: RoomTarget },

    #[error("issue {0} no longer exists")]
    IssueGone(String),

    #[error("project {0} no longer exists")]
    ProjectGone(String),

    /// Chat connection lost or tracker unreachable. Worth retrying later.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Chat(ChatError),

    #[error(transparent)]
    Tracker(TrackerError),
}

impl From<ChatError> for DispatchError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::NotConnected => Self::Unavailable(e.to_string()),
            e => Self::Chat(e),
        }
    }
}

impl From<TrackerError> for DispatchError {
    fn from(e: TrackerError) -> Self {
        if e.is_transient() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Tracker(e)
        }
    }
}

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub rooms_ensured: usize,
    pub rooms_deferred: usize,
    pub rooms_dropped: usize,
    pub actions_done: usize,
    pub actions_retained: usize,
    pub actions_dropped: usize,
    pub corrupt_dropped: usize,
    /// The pass stopped early because a backend was unavailable.
    pub interrupted: bool,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Something that can run one full drain of the queue.
#[async_trait]
pub trait Replay: Send + Sync {
    async fn replay(&self) -> Result<DrainReport, QueueError>;
}

pub struct Dispatcher {
    queue: DurableQueue,
    chat: Arc<dyn ChatApi>,
    tracker: Arc<dyn TrackerApi>,
}

impl Dispatcher {
    pub fn new(queue: DurableQueue, chat: Arc<dyn ChatApi>, tracker: Arc<dyn TrackerApi>) -> Self {
        Self {
            queue,
            chat,
            tracker,
        }
    }

    /// Snapshot the queue and process everything in it.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        let snapshot = self.queue.snapshot().await?;
        if snapshot.is_empty() {
            return Ok(DrainReport::default());
        }
        self.process_batch(snapshot).await
    }

    pub async fn process_batch(&self, snapshot: QueueSnapshot) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();

        // Rooms first: actions address rooms by alias.
        let mut deferred = Vec::new();
        for room in &snapshot.rooms {
            if report.interrupted {
                deferred.push(room);
                continue;
            }
            match self.ensure_room(room).await {
                Ok(RoomOutcome::Created) | Ok(RoomOutcome::Existing) => report.rooms_ensured += 1,
                Ok(RoomOutcome::Dropped) => report.rooms_dropped += 1,
                Err(e) => {
                    warn!("Deferring room {:?}: {}", room_label(room), e);
                    report.interrupted = matches!(e, DispatchError::Unavailable(_));
                    deferred.push(room);
                }
            }
        }
        for room in &deferred {
            self.queue.requeue_room(room).await?;
        }
        report.rooms_deferred = deferred.len();
        self.queue.remove_rooms(snapshot.rooms_read).await?;

        for redis_key in &snapshot.corrupt_keys {
            warn!("Dropping unreadable action record {}", redis_key);
            self.queue.remove_action(redis_key).await?;
            report.corrupt_dropped += 1;
        }

        for record in &snapshot.actions {
            if report.interrupted {
                report.actions_retained += 1;
                continue;
            }
            match self.run_action(&record.action).await {
                Ok(()) => {
                    self.queue.remove_action(&record.redis_key).await?;
                    report.actions_done += 1;
                }
                Err(DispatchError::RoomMissing { target }) => {
                    info!(
                        "Room for {} is missing, keeping record and re-queuing the room",
                        record.redis_key
                    );
                    self.queue.requeue_room(&target.to_room_record()).await?;
                    report.actions_retained += 1;
                }
                Err(DispatchError::Unavailable(reason)) => {
                    warn!(
                        "Stopping drain at {}, records stay queued: {}",
                        record.redis_key, reason
                    );
                    report.actions_retained += 1;
                    report.interrupted = true;
                }
                Err(e) => {
                    error!("Dropping action record {}: {}", record.redis_key, e);
                    self.queue.remove_action(&record.redis_key).await?;
                    report.actions_dropped += 1;
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Replay for Dispatcher {
    async fn replay(&self) -> Result<DrainReport, QueueError> {
        self.drain().await
    }
}

fn room_label(room: &RoomRecord) -> String {
    match (&room.issue, &room.project_key) {
        (Some(issue), _) => issue.key.clone(),
        (None, Some(project)) => project.clone(),
        (None, None) => "<empty>".to_string(),
    }
}
