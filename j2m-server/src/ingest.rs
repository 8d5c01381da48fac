//! Webhook ingestion: filter, normalize, enqueue, then ask for a drain.

use thiserror::Error;
use tracing::{debug, info};

use j2m_core::{DurableQueue, EnqueueOutcome, QueueError, WebhookEvent};

use crate::filter::{FilterError, FilterVerdict, HookFilter, IgnoreReason};
use crate::parser::{ParseError, ParserRegistry};
use crate::state_machine::{DrainTrigger, ReplayHandle};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("could not enqueue webhook records: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ignored(IgnoreReason),
    Queued {
        rooms: usize,
        actions: usize,
        /// Action records that were already queued by an earlier delivery.
        duplicates: usize,
    },
}

pub struct Pipeline {
    filter: HookFilter,
    parsers: ParserRegistry,
    queue: DurableQueue,
    replay: ReplayHandle,
}

impl Pipeline {
    pub fn new(
        filter: HookFilter,
        parsers: ParserRegistry,
        queue: DurableQueue,
        replay: ReplayHandle,
    ) -> Self {
        Self {
            filter,
            parsers,
            queue,
            replay,
        }
    }

    /// Process one webhook. Records are durable before the drain is requested,
    /// so a request that gets coalesced still sees them.
    pub async fn ingest(&self, event: &WebhookEvent) -> Result<IngestOutcome, IngestError> {
        if let FilterVerdict::Ignore(reason) = self.filter.evaluate(event).await? {
            info!("Ignoring {} hook: {}", event.event_name(), reason);
            return Ok(IngestOutcome::Ignored(reason));
        }

        let items = self.parsers.normalize(event)?;
        let (mut rooms, mut actions, mut duplicates) = (0, 0, 0);
        for item in &items {
            match self.queue.enqueue(item).await? {
                EnqueueOutcome::RoomAppended => rooms += 1,
                EnqueueOutcome::ActionStored => actions += 1,
                EnqueueOutcome::DuplicateAction => duplicates += 1,
            }
        }

        if rooms + actions > 0 {
            info!(
                "Queued {} room(s) and {} action(s) from {} hook",
                rooms,
                actions,
                event.event_name()
            );
            self.replay.request_drain(DrainTrigger::Webhook);
        } else {
            debug!("Nothing new to queue from {} hook", event.event_name());
        }

        Ok(IngestOutcome::Queued {
            rooms,
            actions,
            duplicates,
        })
    }
}
