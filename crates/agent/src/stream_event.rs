//! Session-level streaming events.
//!
//! A generation produces an ordered stream of `SessionEvent`s on a bounded
//! channel: optional model-loading progress, text deltas, then exactly one
//! terminal event.
//!
//! - `model_loading`: the backend is being loaded
//! - `model_loaded`: load finished, with the wall-clock duration
//! - `delta`: a batch of generated text
//! - `completed`: generation ended normally
//! - `cancelled`: generation ended after `stop()`
//! - `failed`: load or generation error, with a stable code

use llamart_core::backend::BackendKind;
use llamart_core::error::ErrorCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The backend was not loaded and loading has started.
    ModelLoading { kind: BackendKind },

    /// The backend finished loading.
    ModelLoaded { kind: BackendKind, elapsed_ms: u64 },

    /// Buffered tokens, in generation order.
    Delta { content: String, tokens: usize },

    /// Generation finished; `text` is what was remembered.
    Completed { text: String, tokens: usize },

    /// Generation was stopped; `text` is the partial response remembered.
    Cancelled { text: String, tokens: usize },

    /// Load or generation failed. Nothing was remembered.
    Failed {
        category: ErrorCategory,
        code: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ModelLoading { .. } => "model_loading",
            Self::ModelLoaded { .. } => "model_loaded",
            Self::Delta { .. } => "delta",
            Self::Completed { .. } => "completed",
            Self::Cancelled { .. } => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }

    pub(crate) fn failed(error: &llamart_core::Error) -> Self {
        Self::Failed {
            category: error.category(),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}
