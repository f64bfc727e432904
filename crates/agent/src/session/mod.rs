//! Generation session: the request state machine.
//!
//! ```text
//! Idle → Loading → Streaming → {Completed, Cancelled, Failed} → Idle
//! ```
//!
//! One session serves one conversation. It owns a lazily created backend
//! handle per model family, runs at most one generation at a time, and
//! writes each resolved turn into conversation memory.
//!
//! # Threads
//!
//! `start` runs on the caller's async task up to prompt assembly. Loading
//! and generation run on the blocking pool; the backend's token callback
//! delivers deltas through a bounded channel (`blocking_send`, so a slow
//! reader applies back-pressure instead of losing text). The memory append
//! and the terminal event happen back on the async side.
//!
//! # Locks
//!
//! `control` (state + current cancel flag) is always taken before `slots`
//! (model selection + backend handles).

mod handle;
mod job;
mod policy;

pub use handle::{GenerationHandle, GenerationOutcome};

use crate::preprocess::ImagePreprocessor;
use crate::prompt::PromptAssembler;
use chrono::Utc;
use image::DynamicImage;
use job::{Finisher, Job};
use llamart_config::GenerationConfig;
use llamart_core::backend::{Backend, BackendFactory, BackendKind, ModelSelection};
use llamart_core::error::ImageError;
use llamart_core::event::{DomainEvent, EventBus};
use llamart_core::image::PlanarRgbImage;
use llamart_knowledge::KnowledgeBase;
use llamart_memory::ConversationMemory;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── Types ─────────────────────────────────────────────────────────────────

/// Tunables for a session, normally taken from `[generation]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Passed to the backend as `max_tokens`.
    pub sequence_length: usize,
    /// Buffered tokens are flushed once there are more than this many.
    pub flush_threshold: usize,
    pub image_width: u32,
    /// Resized images taller than this are rejected.
    pub max_image_height: u32,
    pub channel_capacity: usize,
}

impl SessionConfig {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            sequence_length: config.sequence_length,
            flush_threshold: config.flush_threshold,
            image_width: config.image_width,
            max_image_height: config.max_image_height,
            channel_capacity: config.channel_capacity,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `select_model` did with the new selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Backend handles were discarded; the next request uses the new model.
    Applied,
    /// A generation is running; the selection applies when it ends.
    Deferred,
}

/// Why `start` refused a request. A refused request changes nothing.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("a generation is already in progress")]
    Busy,

    #[error("no model selected")]
    NoModelSelected,

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "session.empty_prompt",
            Self::Busy => "session.busy",
            Self::NoModelSelected => "session.no_model",
            Self::Image(e) => e.code(),
        }
    }
}

/// One user turn. The backend family comes from the session's model
/// selection, not from the request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_text: String,
    pub image: Option<DynamicImage>,
}

impl GenerationRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.image = Some(image);
        self
    }
}

// ── Shared state ──────────────────────────────────────────────────────────

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Optional domain event sink.
#[derive(Clone, Default)]
pub(crate) struct Publisher(Option<Arc<EventBus>>);

impl Publisher {
    pub fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.0 {
            bus.publish(event);
        }
    }
}

struct Control {
    state: SessionState,
    /// Cancel flag of the request in flight, if any.
    cancel: Option<Arc<AtomicBool>>,
}

#[derive(Default)]
struct BackendSlots {
    selection: Option<ModelSelection>,
    /// Selection made while a generation was running.
    pending: Option<ModelSelection>,
    text: Option<Arc<dyn Backend>>,
    multimodal: Option<Arc<dyn Backend>>,
}

impl BackendSlots {
    fn replace_selection(&mut self, selection: ModelSelection) {
        self.text = None;
        self.multimodal = None;
        self.selection = Some(selection);
    }

    /// The current selection and its backend, created on first use.
    fn acquire(&mut self, factory: &dyn BackendFactory) -> Option<(ModelSelection, Arc<dyn Backend>)> {
        let selection = self.selection.clone()?;
        let slot = match selection.kind {
            BackendKind::Text => &mut self.text,
            BackendKind::Multimodal => &mut self.multimodal,
        };
        let backend = slot
            .get_or_insert_with(|| {
                debug!(kind = %selection.kind, "Creating backend handle");
                factory.create(&selection)
            })
            .clone();
        Some((selection, backend))
    }
}

pub(crate) struct Shared {
    control: Mutex<Control>,
    slots: Mutex<BackendSlots>,
}

impl Shared {
    fn new() -> Self {
        Self {
            control: Mutex::new(Control {
                state: SessionState::Idle,
                cancel: None,
            }),
            slots: Mutex::new(BackendSlots::default()),
        }
    }

    fn set_state(&self, to: SessionState) {
        let mut control = lock(&self.control);
        debug!(from = %control.state, to = %to, "Session state");
        control.state = to;
    }

    /// Leave Loading/Streaming, through `terminal` if given, back to Idle.
    /// A selection parked during the generation is applied here.
    fn settle(&self, terminal: Option<SessionState>, events: &Publisher) {
        let mut control = lock(&self.control);
        if let Some(terminal) = terminal {
            debug!(from = %control.state, to = %terminal, "Session state");
        }
        control.state = SessionState::Idle;
        control.cancel = None;

        let mut slots = lock(&self.slots);
        if let Some(selection) = slots.pending.take() {
            info!(
                kind = %selection.kind,
                model = %selection.model_path.display(),
                "Applying deferred model selection"
            );
            let kind = selection.kind;
            slots.replace_selection(selection);
            events.publish(DomainEvent::BackendsInvalidated {
                kind,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Puts the session back to Idle if `start` bails out after claiming it.
struct ClaimGuard {
    shared: Arc<Shared>,
    events: Publisher,
    armed: bool,
}

impl ClaimGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Request abandoned before generation, releasing session");
            self.shared.settle(None, &self.events);
        }
    }
}

struct Claim {
    guard: ClaimGuard,
    selection: ModelSelection,
    backend: Arc<dyn Backend>,
    cancel: Arc<AtomicBool>,
}

// ── Session ───────────────────────────────────────────────────────────────

/// The conversation's generation context.
pub struct GenerationSession {
    config: SessionConfig,
    knowledge: Arc<KnowledgeBase>,
    memory: Arc<ConversationMemory>,
    factory: Arc<dyn BackendFactory>,
    assembler: PromptAssembler,
    preprocessor: ImagePreprocessor,
    events: Publisher,
    shared: Arc<Shared>,
}

impl GenerationSession {
    pub fn new(
        config: SessionConfig,
        knowledge: Arc<KnowledgeBase>,
        memory: Arc<ConversationMemory>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            config,
            knowledge,
            memory,
            factory,
            assembler: PromptAssembler::default(),
            preprocessor: ImagePreprocessor::new(config.image_width)
                .with_max_height(config.max_image_height),
            events: Publisher::default(),
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn with_assembler(mut self, assembler: PromptAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Publish domain events (model loaded, turn remembered, …) on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Publisher(Some(bus));
        self
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.control).state
    }

    /// The selection new requests are served with.
    pub fn selection(&self) -> Option<ModelSelection> {
        lock(&self.shared.slots).selection.clone()
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    /// Switch model and tokenizer.
    ///
    /// Existing backend handles are discarded so the next request loads the
    /// new model. While a generation runs the switch is parked and applied
    /// when the session returns to Idle; the running call keeps its handle.
    pub fn select_model(&self, selection: ModelSelection) -> SelectionOutcome {
        let control = lock(&self.shared.control);
        let mut slots = lock(&self.shared.slots);

        if control.state == SessionState::Idle {
            info!(
                kind = %selection.kind,
                model = %selection.model_path.display(),
                "Model selected"
            );
            let kind = selection.kind;
            slots.pending = None;
            slots.replace_selection(selection);
            self.events.publish(DomainEvent::BackendsInvalidated {
                kind,
                timestamp: Utc::now(),
            });
            SelectionOutcome::Applied
        } else {
            info!(
                kind = %selection.kind,
                state = %control.state,
                "Generation in progress, deferring model selection"
            );
            slots.pending = Some(selection);
            SelectionOutcome::Deferred
        }
    }

    /// Ask the running generation to stop.
    ///
    /// A request, not a halt: the backend may deliver a few more tokens.
    /// Calling it repeatedly, or with nothing running, is harmless.
    pub fn stop(&self) {
        let control = lock(&self.shared.control);
        if let Some(cancel) = &control.cancel {
            if !cancel.swap(true, Ordering::SeqCst) {
                info!(state = %control.state, "Stop requested");
            }
        }
    }

    /// Accept a request and start generating in the background.
    ///
    /// The user text is trimmed before retrieval, prompting and memory.
    /// Retrieval runs against that text plus the transcript, and the
    /// transcript never includes the turn being generated.
    pub async fn start(&self, request: GenerationRequest) -> Result<GenerationHandle, SessionError> {
        let GenerationRequest { user_text, image } = request;
        let user_text = user_text.trim().to_owned();
        if user_text.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let claim = self.claim()?;
        let kind = claim.selection.kind;

        let image = match (image, kind) {
            (None, _) => None,
            (Some(_), BackendKind::Text) => {
                warn!("Text backend ignores the attached image");
                None
            }
            (Some(source), BackendKind::Multimodal) => Some(self.prepare_image(source).await?),
        };

        let transcript = self.memory.transcript().await;
        let retrieved = self
            .knowledge
            .retrieve(&PromptAssembler::retrieval_query(&user_text, &transcript));
        let prompt = PromptAssembler::for_backend(
            &self.assembler.build(&user_text, &retrieved, &transcript),
            kind,
        );

        let request_id = Uuid::new_v4().to_string();
        info!(
            request_id = %request_id,
            kind = %kind,
            knowledge_hits = retrieved.len(),
            image = image.is_some(),
            "Generation started"
        );
        self.events.publish(DomainEvent::GenerationStarted {
            request_id: request_id.clone(),
            kind,
            knowledge_hits: retrieved.len(),
            timestamp: Utc::now(),
        });

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let job = Job {
            backend: claim.backend.clone(),
            kind,
            prompt,
            image,
            max_tokens: self.config.sequence_length,
            flush_threshold: self.config.flush_threshold,
            cancel: claim.cancel.clone(),
            shared: self.shared.clone(),
            events: self.events.clone(),
            tx: tx.clone(),
        };
        let finisher = Finisher {
            request_id: request_id.clone(),
            user_text,
            memory: self.memory.clone(),
            cancel: claim.cancel.clone(),
            shared: self.shared.clone(),
            events: self.events.clone(),
            tx,
        };

        claim.guard.disarm();
        let blocking = tokio::task::spawn_blocking(move || job.run());
        tokio::spawn(async move { finisher.finish(blocking.await).await });

        Ok(GenerationHandle::new(request_id, kind, rx))
    }

    /// Resize and split an image on the blocking pool.
    async fn prepare_image(&self, source: DynamicImage) -> Result<PlanarRgbImage, ImageError> {
        let preprocessor = self.preprocessor;
        preprocessor.output_size(source.width(), source.height())?;
        tokio::task::spawn_blocking(move || preprocessor.prepare(&source))
            .await
            .map_err(|e| ImageError::Aborted(e.to_string()))?
    }

    /// Move Idle → Loading for a new request.
    fn claim(&self) -> Result<Claim, SessionError> {
        let mut control = lock(&self.shared.control);
        if control.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        let (selection, backend) = lock(&self.shared.slots)
            .acquire(self.factory.as_ref())
            .ok_or(SessionError::NoModelSelected)?;

        let cancel = Arc::new(AtomicBool::new(false));
        debug!(from = %control.state, to = %SessionState::Loading, "Session state");
        control.state = SessionState::Loading;
        control.cancel = Some(cancel.clone());

        Ok(Claim {
            guard: ClaimGuard {
                shared: self.shared.clone(),
                events: self.events.clone(),
                armed: true,
            },
            selection,
            backend,
            cancel,
        })
    }
}

#[cfg(test)]
mod tests;
