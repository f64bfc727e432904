pub mod ask;
pub mod chat;
pub mod doctor;
pub mod knowledge;
pub mod onboard;
pub mod prompt;

use chrono::Utc;
use llamart_agent::{
    GenerationHandle, GenerationOutcome, GenerationSession, PromptAssembler, SessionConfig,
    SessionEvent, SessionState,
};
use llamart_backends::{LocalBackendFactory, ScriptedBackendFactory, ScriptedConfig};
use llamart_config::AppConfig;
use llamart_core::backend::{BackendFactory, BackendKind, ModelSelection};
use llamart_core::error::SelectionError;
use llamart_core::event::{DomainEvent, EventBus};
use llamart_knowledge::KnowledgeBase;
use llamart_memory::ConversationMemory;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Global flags that override the config file.
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub model: Option<String>,
    pub tokenizer: Option<String>,
}

impl Overrides {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
    }

    pub fn load_config(&self) -> Result<AppConfig, Box<dyn std::error::Error>> {
        let mut config = AppConfig::load_from(&self.config_path())
            .map_err(|e| format!("Failed to load config: {e}"))?;
        if let Some(model) = &self.model {
            config.model.model_path = model.clone();
        }
        if let Some(tokenizer) = &self.tokenizer {
            config.model.tokenizer_path = tokenizer.clone();
        }
        Ok(config)
    }
}

/// Load the configured knowledge source, degrading to empty on failure.
pub fn open_knowledge(config: &AppConfig, events: &EventBus) -> Arc<KnowledgeBase> {
    let path = config.knowledge_path();
    let (knowledge, error) = KnowledgeBase::load_or_empty(&path, config.knowledge.delimiter);
    if let Some(e) = &error {
        eprintln!("  [Knowledge] {e}; answering without reference documents");
    }
    events.publish(DomainEvent::KnowledgeLoaded {
        entries: knowledge.len(),
        degraded: error.is_some(),
        timestamp: Utc::now(),
    });
    Arc::new(knowledge)
}

/// A factory replaying `text`, ending with each family's end marker.
pub fn scripted_factory(text: &str) -> ScriptedBackendFactory {
    let script = |kind: BackendKind| {
        let mut tokens: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        tokens.push(kind.end_of_sequence().to_string());
        ScriptedConfig::new(tokens)
    };
    ScriptedBackendFactory::new(script(BackendKind::Text))
        .with_kind(BackendKind::Multimodal, script(BackendKind::Multimodal))
}

/// Build a session over the configured knowledge and a fresh memory.
pub fn build_session(
    config: &AppConfig,
    scripted: Option<&str>,
    events: Arc<EventBus>,
) -> GenerationSession {
    let factory: Arc<dyn BackendFactory> = match scripted {
        Some(text) => Arc::new(scripted_factory(text)),
        None => Arc::new(LocalBackendFactory::from_config(&config.generation)),
    };
    GenerationSession::new(
        SessionConfig::from_config(&config.generation),
        open_knowledge(config, &events),
        Arc::new(ConversationMemory::new()),
        factory,
    )
    .with_assembler(PromptAssembler::from_config(&config.prompt))
    .with_event_bus(events)
}

/// The model selection to start with. Scripted runs need no files.
pub fn initial_selection(
    config: &AppConfig,
    scripted: bool,
) -> Result<ModelSelection, SelectionError> {
    if scripted {
        let model = non_empty(&config.model.model_path, "scripted-llama");
        let tokenizer = non_empty(&config.model.tokenizer_path, "scripted-tokenizer");
        return Ok(ModelSelection::new(model, tokenizer));
    }
    config.model_selection()
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Print one streaming event. Deltas go to stdout as they arrive.
pub fn render_event(event: &SessionEvent) {
    match event {
        SessionEvent::ModelLoading { kind } => eprintln!("  Loading {kind} model..."),
        SessionEvent::ModelLoaded { kind, elapsed_ms } => {
            eprintln!("  {kind} model loaded in {elapsed_ms} ms")
        }
        SessionEvent::Delta { content, .. } => {
            print!("{content}");
            if let Err(e) = std::io::stdout().flush() {
                debug!("stdout flush failed: {e}");
            }
        }
        _ => {}
    }
}

/// Print the end of a generation after its deltas.
pub fn render_outcome(outcome: &GenerationOutcome) {
    match outcome {
        GenerationOutcome::Completed { .. } => println!(),
        GenerationOutcome::Cancelled { .. } => println!("\n  [Stopped]"),
        GenerationOutcome::Failed { code, message, .. } => {
            println!();
            eprintln!("  [Error] {message} ({code})");
        }
    }
}

/// Stream a generation to stdout.
pub async fn stream_to_stdout(handle: GenerationHandle) -> GenerationOutcome {
    debug!(request_id = handle.request_id(), kind = %handle.kind(), "Streaming answer");
    let outcome = handle.wait_with(render_event).await;
    render_outcome(&outcome);
    outcome
}

/// What a Ctrl+C did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// An answer was running and has been asked to stop.
    Stopped,
    /// Nothing was running.
    Quit,
}

pub fn interrupt(session: &GenerationSession) -> Interrupt {
    if session.state() == SessionState::Idle {
        Interrupt::Quit
    } else {
        session.stop();
        Interrupt::Stopped
    }
}

/// Handle Ctrl+C for the rest of the process.
///
/// Once installed the default SIGINT exit is gone: a running answer is
/// stopped, otherwise the returned `Notify` fires so the caller can quit.
pub fn listen_for_interrupts(session: Arc<GenerationSession>) -> Arc<Notify> {
    let quit = Arc::new(Notify::new());
    let notify = quit.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt(&session) == Interrupt::Quit {
                notify.notify_one();
            }
        }
    });
    quit
}
