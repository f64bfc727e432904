//! Domain event system: decoupled observability for the session layer.
//!
//! Events are published when something interesting happens (a model was
//! loaded, a generation finished, a turn was remembered). Front ends and
//! diagnostics can subscribe without the session knowing about them.

use crate::backend::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The knowledge source was read (or degraded to empty)
    KnowledgeLoaded {
        entries: usize,
        degraded: bool,
        timestamp: DateTime<Utc>,
    },

    /// A backend finished loading its model
    ModelLoaded {
        kind: BackendKind,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A backend failed to load its model
    ModelLoadFailed {
        kind: BackendKind,
        code: String,
        timestamp: DateTime<Utc>,
    },

    /// A generation request was accepted
    GenerationStarted {
        request_id: String,
        kind: BackendKind,
        knowledge_hits: usize,
        timestamp: DateTime<Utc>,
    },

    /// A generation reached a terminal state
    GenerationFinished {
        request_id: String,
        status: String, // "completed", "cancelled", "failed"
        tokens: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn was appended to conversation memory
    MemoryAppended {
        sequence: u64,
        response_chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// Backend handles were discarded after a model switch
    BackendsInvalidated {
        kind: BackendKind,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::KnowledgeLoaded { timestamp, .. }
            | Self::ModelLoaded { timestamp, .. }
            | Self::ModelLoadFailed { timestamp, .. }
            | Self::GenerationStarted { timestamp, .. }
            | Self::GenerationFinished { timestamp, .. }
            | Self::MemoryAppended { timestamp, .. }
            | Self::BackendsInvalidated { timestamp, .. } => *timestamp,
        }
    }
}

/// Fan-out of [`DomainEvent`]s to any number of observers.
///
/// Built on `tokio::sync::broadcast`. Publishing never blocks; a slow
/// subscriber loses the oldest events once `capacity` is exceeded.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
