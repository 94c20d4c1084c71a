//! Practice event types and EventBus
//!
//! Events are the user-visible notification channel of the practice
//! service: failures that were rolled back, completed batches, scroll
//! requests. They are broadcast to every subscriber and can be serialized
//! for transmission to a client.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Practice event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PracticeEvent {
    /// Queue snapshot retrieval failed; the previous snapshot was kept
    SnapshotFetchFailed {
        user_id: i64,
        playlist_id: i64,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A fresh snapshot replaced the cached one
    SnapshotRefreshed {
        user_id: i64,
        playlist_id: i64,
        entry_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Backlog items were appended to the queue
    QueueRefilled {
        playlist_id: i64,
        added: Vec<i64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Items were explicitly added to the queue
    ItemsAdded {
        playlist_id: i64,
        added: Vec<i64>,
        skipped: Vec<i64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A tentative grade round-tripped successfully
    EvaluationStaged {
        playlist_id: i64,
        item_id: i64,
        grade: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Staging failed and the optimistic grade was rolled back
    EvaluationStagingFailed {
        playlist_id: i64,
        item_id: i64,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A tentative grade was discarded
    EvaluationCleared {
        playlist_id: i64,
        item_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Clearing failed and the staged grade was restored
    EvaluationClearFailed {
        playlist_id: i64,
        item_id: i64,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch of staged grades was committed
    EvaluationsSubmitted {
        playlist_id: i64,
        item_ids: Vec<i64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Batch submission failed; every item stays staged
    SubmissionFailed {
        playlist_id: i64,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Ask whichever view owns the item list to bring an item into view
    ScrollToItem {
        playlist_id: i64,
        item_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PracticeEvent {
    /// True for events that report a rolled-back or failed operation
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PracticeEvent::SnapshotFetchFailed { .. }
                | PracticeEvent::EvaluationStagingFailed { .. }
                | PracticeEvent::EvaluationClearFailed { .. }
                | PracticeEvent::SubmissionFailed { .. }
        )
    }
}

/// Central event distribution bus
///
/// Cloning is cheap; every clone publishes to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PracticeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before slow subscribers
    /// start losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PracticeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PracticeEvent,
    ) -> Result<usize, broadcast::error::SendError<PracticeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PracticeEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            if event.is_failure() {
                debug!(?event, "Failure event dropped, no subscribers");
            }
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
