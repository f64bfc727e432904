//! Caller side of a running generation.

use crate::stream_event::SessionEvent;
use llamart_core::backend::BackendKind;
use llamart_core::error::ErrorCategory;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Completed {
        text: String,
        tokens: usize,
    },
    Cancelled {
        text: String,
        tokens: usize,
    },
    Failed {
        category: ErrorCategory,
        code: String,
        message: String,
    },
}

impl GenerationOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Cancelled { .. } => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    /// The response text, unless the generation failed.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed { text, .. } | Self::Cancelled { text, .. } => Some(text),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    fn from_terminal(event: SessionEvent) -> Option<Self> {
        match event {
            SessionEvent::Completed { text, tokens } => Some(Self::Completed { text, tokens }),
            SessionEvent::Cancelled { text, tokens } => Some(Self::Cancelled { text, tokens }),
            SessionEvent::Failed {
                category,
                code,
                message,
            } => Some(Self::Failed {
                category,
                code,
                message,
            }),
            _ => None,
        }
    }
}

/// Receives the events of one accepted generation request.
///
/// Dropping the handle makes the session cancel the generation at the next
/// flush; the partial response is still remembered.
#[derive(Debug)]
pub struct GenerationHandle {
    request_id: String,
    kind: BackendKind,
    events: mpsc::Receiver<SessionEvent>,
}

impl GenerationHandle {
    pub(crate) fn new(
        request_id: String,
        kind: BackendKind,
        events: mpsc::Receiver<SessionEvent>,
    ) -> Self {
        Self {
            request_id,
            kind,
            events,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The backend family serving this request.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Next event, or `None` once the terminal event has been received.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<SessionEvent> {
        ReceiverStream::new(self.events)
    }

    /// Drain the stream and return the outcome.
    pub async fn wait(self) -> GenerationOutcome {
        self.wait_with(|_| {}).await
    }

    /// Drain the stream, showing every event to `on_event` first.
    pub async fn wait_with(mut self, mut on_event: impl FnMut(&SessionEvent)) -> GenerationOutcome {
        while let Some(event) = self.events.recv().await {
            on_event(&event);
            if let Some(outcome) = GenerationOutcome::from_terminal(event) {
                return outcome;
            }
        }
        GenerationOutcome::Failed {
            category: ErrorCategory::Internal,
            code: "internal".into(),
            message: "event stream closed without a terminal event".into(),
        }
    }
}
