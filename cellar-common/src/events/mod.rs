//! Event types for the Cellarcount event system
//!
//! Provides shared event definitions and the EventBus used to notify
//! connected UIs (via SSE) about recognition, sync and outbox activity.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Cellarcount event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CellarEvent {
    /// A label recognition attempt reached a terminal state
    LabelRecognized {
        attempt_id: Uuid,
        user_id: String,
        session_id: Option<String>,
        /// success | manual_review | select_variant | failed
        outcome: String,
        matched_product_id: Option<String>,
        confidence: i32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sync run moved to a new stage
    SyncProgress {
        sync_run_id: Uuid,
        stage: String,
        progress: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sync run finished successfully
    SyncCompleted {
        sync_run_id: Uuid,
        run_type: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sync run failed
    SyncFailed {
        sync_run_id: Uuid,
        stage: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Outbox job delivery attempt finished
    OutboxJobDispatched {
        job_id: Uuid,
        session_id: String,
        /// success | pending | failed
        status: String,
        attempts: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CellarEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            CellarEvent::LabelRecognized { .. } => "LabelRecognized",
            CellarEvent::SyncProgress { .. } => "SyncProgress",
            CellarEvent::SyncCompleted { .. } => "SyncCompleted",
            CellarEvent::SyncFailed { .. } => "SyncFailed",
            CellarEvent::OutboxJobDispatched { .. } => "OutboxJobDispatched",
        }
    }
}

/// Broadcast bus shared by all request handlers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CellarEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use cellar_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CellarEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CellarEvent,
    ) -> Result<usize, broadcast::error::SendError<CellarEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CellarEvent) {
        let _ = self.tx.send(event);
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
