//! Asset change events and the event bus that fans them out.
//!
//! The model controller and the asset manager emit [`AssetEvent`]s on one
//! broadcast channel; UI-facing consumers subscribe independently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Envelope carrying an event with its identity and timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"assets.added"`).
    pub event_type: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: AssetEvent,
}

impl EventEnvelope {
    pub fn new(event: AssetEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

/// Change notification for observers of the asset model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum AssetEvent {
    /// New assets appeared locally (device library or server delta).
    AssetsAdded { ids: Vec<Uuid> },
    /// Existing assets changed (flags, paths, import status).
    AssetsUpdated { ids: Vec<Uuid> },
    /// Assets were terminated or deleted.
    AssetsRemoved { ids: Vec<Uuid> },
    /// Assets finished importing.
    ImportCompleted { ids: Vec<Uuid> },
    /// Assets failed to import permanently.
    ImportFailed { ids: Vec<Uuid> },
    /// Sync tracker progress changed.
    SyncProgress { completed: usize, total: usize },
    /// The import queue was suspended or resumed.
    QueueSuspended { queue: String, suspended: bool },
}

impl AssetEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AssetEvent::AssetsAdded { .. } => "assets.added",
            AssetEvent::AssetsUpdated { .. } => "assets.updated",
            AssetEvent::AssetsRemoved { .. } => "assets.removed",
            AssetEvent::ImportCompleted { .. } => "import.completed",
            AssetEvent::ImportFailed { .. } => "import.failed",
            AssetEvent::SyncProgress { .. } => "sync.progress",
            AssetEvent::QueueSuspended { .. } => "queue.suspended",
        }
    }
}

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind receive a `Lagged` error and miss events;
/// observers re-read model state on lag.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Without subscribers it is dropped.
    pub fn emit(&self, event: AssetEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
