//! In-process event bus linking the ingest pipeline, the transcode scheduler,
//! and any observers the embedding process registers.
//!
//! Subscribers register a bounded queue per event kind. Dispatch never blocks:
//! a subscriber whose queue is full misses that message (the drop is logged)
//! while delivery to the other subscribers proceeds. Each subscriber sees the
//! messages it does receive in dispatch order.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use thea_model::{ItemId, MediaId, TaskId};

/// Topic a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    IngestUpdate,
    IngestComplete,
    NewMedia,
    TranscodeUpdate,
    TranscodeComplete,
}

/// Notification payloads emitted by the two cores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// An ingest item changed state.
    IngestUpdate { item_id: ItemId },
    /// An ingest item finished and was removed from the queue.
    IngestComplete { item_id: ItemId },
    /// A media container was persisted and is ready for downstream work.
    NewMedia { media_id: MediaId },
    /// A transcode task changed state or reported progress.
    TranscodeUpdate { task_id: TaskId },
    /// A transcode task completed and its record was persisted.
    TranscodeComplete { task_id: TaskId },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::IngestUpdate { .. } => EventKind::IngestUpdate,
            Self::IngestComplete { .. } => EventKind::IngestComplete,
            Self::NewMedia { .. } => EventKind::NewMedia,
            Self::TranscodeUpdate { .. } => EventKind::TranscodeUpdate,
            Self::TranscodeComplete { .. } => EventKind::TranscodeComplete,
        }
    }
}

/// Lightweight in-process bus fanning events out to per-kind subscriber
/// queues. Cheap to share behind an `Arc`; dispatch and subscribe tolerate
/// concurrent callers.
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<mpsc::Sender<Event>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self
            .subscribers
            .read()
            .map(|map| map.iter().map(|(kind, subs)| (*kind, subs.len())).collect::<Vec<_>>())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a delivery queue for one event kind. The returned receiver
    /// holds at most `capacity` undelivered events; once full, further events
    /// of this kind are dropped for this subscriber only.
    pub fn subscribe(&self, kind: EventKind, capacity: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        subscribers.entry(kind).or_default().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber of its kind without
    /// blocking. Closed subscriptions are pruned as a side effect.
    pub fn dispatch(&self, event: Event) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        let Some(queues) = subscribers.get_mut(&kind) else {
            return;
        };

        queues.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(?kind, "subscriber queue full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}
