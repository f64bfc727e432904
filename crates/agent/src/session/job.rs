//! One accepted generation: the blocking half that drives the backend and
//! the async half that resolves the outcome.

use super::policy::{StreamSummary, TokenStream};
use super::{Publisher, SessionState, Shared};
use crate::stream_event::SessionEvent;
use chrono::Utc;
use llamart_core::backend::{Backend, BackendKind};
use llamart_core::error::{Error, GenerationError, LoadError};
use llamart_core::event::DomainEvent;
use llamart_core::image::PlanarRgbImage;
use llamart_memory::ConversationMemory;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

pub(super) enum JobOutcome {
    /// `stop()` arrived before the backend was asked to generate.
    CancelledBeforeGenerate,
    LoadFailed(LoadError),
    Generated {
        result: Result<(), GenerationError>,
        summary: StreamSummary,
    },
}

/// Runs on the blocking pool: load if needed, then generate.
pub(super) struct Job {
    pub backend: Arc<dyn Backend>,
    pub kind: BackendKind,
    pub prompt: String,
    pub image: Option<PlanarRgbImage>,
    pub max_tokens: usize,
    pub flush_threshold: usize,
    pub cancel: Arc<AtomicBool>,
    pub shared: Arc<Shared>,
    pub events: Publisher,
    pub tx: mpsc::Sender<SessionEvent>,
}

impl Job {
    pub fn run(self) -> JobOutcome {
        if self.cancelled() {
            return JobOutcome::CancelledBeforeGenerate;
        }

        if !self.backend.is_loaded() {
            if let Err(e) = self.load() {
                return JobOutcome::LoadFailed(e);
            }
        }

        if self.cancelled() {
            return JobOutcome::CancelledBeforeGenerate;
        }

        self.shared.set_state(SessionState::Streaming);
        let mut stream = TokenStream::new(
            self.kind,
            &self.prompt,
            self.backend.as_ref(),
            &self.cancel,
            &self.tx,
            self.flush_threshold,
        );
        let result = self.backend.generate(
            &self.prompt,
            self.image.as_ref(),
            self.max_tokens,
            &mut |token: &str| stream.on_token(token),
        );
        JobOutcome::Generated {
            result,
            summary: stream.finish(),
        }
    }

    fn cancelled(&self) -> bool {
        let cancelled = self.cancel.load(Ordering::SeqCst);
        if cancelled {
            debug!(kind = %self.kind, "Cancelled before generation");
        }
        cancelled
    }

    fn load(&self) -> Result<(), LoadError> {
        self.emit(SessionEvent::ModelLoading { kind: self.kind });
        let started = Instant::now();

        match self.backend.load() {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(kind = %self.kind, elapsed_ms, "Model loaded");
                self.events.publish(DomainEvent::ModelLoaded {
                    kind: self.kind,
                    duration_ms: elapsed_ms,
                    timestamp: Utc::now(),
                });
                self.emit(SessionEvent::ModelLoaded {
                    kind: self.kind,
                    elapsed_ms,
                });
                Ok(())
            }
            Err(e) => {
                warn!(kind = %self.kind, code = e.code(), "Model loading failed: {e}");
                self.events.publish(DomainEvent::ModelLoadFailed {
                    kind: self.kind,
                    code: e.code().to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.tx.blocking_send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Runs on the async side once the blocking half has returned.
pub(super) struct Finisher {
    pub request_id: String,
    pub user_text: String,
    pub memory: Arc<ConversationMemory>,
    pub cancel: Arc<AtomicBool>,
    pub shared: Arc<Shared>,
    pub events: Publisher,
    pub tx: mpsc::Sender<SessionEvent>,
}

impl Finisher {
    /// Remember the turn, return the session to idle, then tell the caller.
    pub async fn finish(self, joined: Result<JobOutcome, JoinError>) {
        let (terminal, state) = match joined {
            Ok(JobOutcome::CancelledBeforeGenerate) => (
                SessionEvent::Cancelled {
                    text: String::new(),
                    tokens: 0,
                },
                SessionState::Cancelled,
            ),
            Ok(JobOutcome::LoadFailed(e)) => self.failure(Error::Load(e)),
            Ok(JobOutcome::Generated {
                result: Err(e),
                summary,
            }) => {
                debug!(tokens = summary.tokens, "Discarding partial response of failed generation");
                self.failure(Error::Generation(e))
            }
            Ok(JobOutcome::Generated {
                result: Ok(()),
                summary,
            }) => self.resolve(summary).await,
            Err(e) => self.failure(Error::Internal(format!("generation task failed: {e}"))),
        };

        self.shared.settle(Some(state), &self.events);

        let tokens = match &terminal {
            SessionEvent::Completed { tokens, .. } | SessionEvent::Cancelled { tokens, .. } => {
                *tokens
            }
            _ => 0,
        };
        info!(
            request_id = %self.request_id,
            status = %state,
            tokens,
            "Generation finished"
        );
        self.events.publish(DomainEvent::GenerationFinished {
            request_id: self.request_id.clone(),
            status: state.to_string(),
            tokens,
            timestamp: Utc::now(),
        });

        if self.tx.send(terminal).await.is_err() {
            debug!(request_id = %self.request_id, "Receiver dropped before terminal event");
        }
    }

    async fn resolve(&self, summary: StreamSummary) -> (SessionEvent, SessionState) {
        // The end marker counts as completion even though it raised the
        // cancel flag on the multimodal path.
        let completed = summary.end_reached || !self.cancel.load(Ordering::SeqCst);

        let sequence = self
            .memory
            .append(self.user_text.as_str(), summary.text.as_str())
            .await;
        self.events.publish(DomainEvent::MemoryAppended {
            sequence,
            response_chars: summary.text.chars().count(),
            timestamp: Utc::now(),
        });

        let StreamSummary { text, tokens, .. } = summary;
        if completed {
            (SessionEvent::Completed { text, tokens }, SessionState::Completed)
        } else {
            (SessionEvent::Cancelled { text, tokens }, SessionState::Cancelled)
        }
    }

    fn failure(&self, error: Error) -> (SessionEvent, SessionState) {
        warn!(
            request_id = %self.request_id,
            category = %error.category(),
            code = error.code(),
            "Generation failed: {error}"
        );
        (SessionEvent::failed(&error), SessionState::Failed)
    }
}
