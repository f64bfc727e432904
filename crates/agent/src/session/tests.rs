use super::*;
use crate::stream_event::SessionEvent;
use image::{Rgba, RgbaImage};
use llamart_backends::{ScriptedBackend, ScriptedBackendFactory, ScriptedConfig};
use llamart_core::error::{ErrorCategory, GenerationError, LoadError};
use llamart_core::knowledge::KnowledgeEntry;
use std::time::Duration;

const LLAMA: &str = "/models/Llama-3.2-1B.gguf";
const LLAVA: &str = "/models/llava-v1.5.pte";
const TOKENIZER: &str = "/models/tokenizer.bin";

struct Harness {
    session: GenerationSession,
    memory: Arc<ConversationMemory>,
    factory: Arc<ScriptedBackendFactory>,
}

impl Harness {
    fn new(factory: ScriptedBackendFactory) -> Self {
        Self::with_knowledge(factory, Vec::new())
    }

    fn with_knowledge(factory: ScriptedBackendFactory, entries: Vec<KnowledgeEntry>) -> Self {
        let factory = Arc::new(factory);
        let memory = Arc::new(ConversationMemory::new());
        let session = GenerationSession::new(
            SessionConfig::default(),
            Arc::new(KnowledgeBase::from_entries(entries)),
            memory.clone(),
            factory.clone(),
        );
        session.select_model(ModelSelection::new(LLAMA, TOKENIZER));
        Self {
            session,
            memory,
            factory,
        }
    }

    fn backend(&self) -> Arc<ScriptedBackend> {
        self.factory.last_created().expect("a backend was created")
    }

    async fn ask(&self, text: &str) -> (Vec<SessionEvent>, GenerationOutcome) {
        let handle = self.session.start(GenerationRequest::new(text)).await.unwrap();
        let mut events = Vec::new();
        let outcome = handle.wait_with(|e| events.push(e.clone())).await;
        (events, outcome)
    }
}

fn scripted<const N: usize>(tokens: [&str; N]) -> ScriptedBackendFactory {
    ScriptedBackendFactory::new(ScriptedConfig::new(tokens))
}

fn delivered(events: &[SessionEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Delta { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

async fn wait_paused(backend: &Arc<ScriptedBackend>) {
    let backend = backend.clone();
    let paused = tokio::task::spawn_blocking(move || backend.wait_until_paused(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(paused, "backend never paused");
}

// ── Happy path ────────────────────────────────────────────────────────────

#[tokio::test]
async fn completes_and_remembers_turn() {
    let h = Harness::new(scripted(["Hel", "lo", " world"]));
    let (events, outcome) = h.ask("Say hello").await;

    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            text: "Hello world".into(),
            tokens: 3
        }
    );
    assert_eq!(delivered(&events), "Hello world");
    assert_eq!(
        h.memory.transcript().await,
        "User: Say hello\nAssistant: Hello world\n"
    );
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn events_arrive_in_order() {
    let h = Harness::new(scripted(["a", "b", "c", "d"]));
    let (events, _) = h.ask("go").await;
    let types: Vec<&str> = events.iter().map(SessionEvent::event_type).collect();
    assert_eq!(
        types,
        vec!["model_loading", "model_loaded", "delta", "delta", "completed"]
    );
    assert!(matches!(
        &events[2],
        SessionEvent::Delta { content, tokens: 3 } if content == "abc"
    ));
}

#[tokio::test]
async fn prompt_echo_never_reaches_caller() {
    let h = Harness::new(scripted(["ok"]));
    let (events, outcome) = h.ask("What is Olympia?").await;
    assert_eq!(outcome.text(), Some("ok"));
    assert!(!delivered(&events).contains("<|begin_of_text|>"));
    assert_eq!(h.backend().prompts().len(), 1);
}

#[tokio::test]
async fn backend_is_created_and_loaded_once() {
    let h = Harness::new(scripted(["x"]));
    h.ask("first").await;
    let (events, outcome) = h.ask("second").await;

    assert!(outcome.is_completed());
    assert!(!events.iter().any(|e| e.event_type() == "model_loading"));
    assert_eq!(h.factory.created().len(), 1);
    assert_eq!(h.backend().load_calls(), 1);
    assert_eq!(h.backend().generate_calls(), 2);
}

#[tokio::test]
async fn transcript_and_knowledge_feed_the_next_prompt() {
    let h = Harness::with_knowledge(
        scripted(["It is by Manet."]),
        vec![
            KnowledgeEntry::new("Olympia", "Manet, 1863"),
            KnowledgeEntry::new("Water Lilies", "Monet series"),
        ],
    );
    h.ask("Who painted Olympia?").await;
    h.ask("When?").await;

    let prompts = h.backend().prompts();
    assert!(!prompts[0].contains("<history>\nUser:"));
    // "Olympia" only occurs in the transcript of the second turn.
    assert!(prompts[1].contains("User: Who painted Olympia?\nAssistant: It is by Manet.\n"));
    assert!(prompts[1].contains("Title: Olympia\nDescription: Manet, 1863"));
    assert!(!prompts[1].contains("Title: Water Lilies"));
    assert!(prompts[1].contains("\nWhen?<|eot_id|>"));
}

#[tokio::test]
async fn padded_text_is_trimmed_everywhere() {
    let h = Harness::with_knowledge(
        scripted(["A Manet."]),
        vec![KnowledgeEntry::new("Olympia", "Manet, 1863")],
    );
    let (_, outcome) = h.ask("  What is Olympia?\n").await;
    assert!(outcome.is_completed());

    let prompt = &h.backend().prompts()[0];
    assert!(prompt.contains("<|end_header_id|>\nWhat is Olympia?<|eot_id|>"));
    assert!(!prompt.contains("  What is Olympia?"));
    assert!(prompt.contains("Title: Olympia"));
    assert_eq!(
        h.memory.transcript().await,
        "User: What is Olympia?\nAssistant: A Manet.\n"
    );
}

#[tokio::test]
async fn max_tokens_is_the_sequence_length() {
    let config = SessionConfig {
        sequence_length: 2,
        ..SessionConfig::default()
    };
    let factory = Arc::new(scripted(["a", "b", "c"]));
    let session = GenerationSession::new(
        config,
        Arc::new(KnowledgeBase::empty()),
        Arc::new(ConversationMemory::new()),
        factory.clone(),
    );
    session.select_model(ModelSelection::new(LLAMA, TOKENIZER));
    let outcome = session
        .start(GenerationRequest::new("q"))
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(outcome.text(), Some("ab"));
}

// ── End of sequence ───────────────────────────────────────────────────────

#[tokio::test]
async fn text_end_marker_hides_trailing_tokens() {
    let h = Harness::new(scripted(["Hi", "<|eot_id|>", "ghost"]));
    let (events, outcome) = h.ask("hello").await;

    assert_eq!(delivered(&events), "Hi");
    assert_eq!(outcome.text(), Some("Hi"));
    assert!(outcome.is_completed());
    // The text runner is left to finish by itself.
    assert_eq!(h.backend().stop_calls(), 0);
    assert_eq!(h.memory.transcript().await, "User: hello\nAssistant: Hi\n");
}

#[tokio::test]
async fn multimodal_end_marker_stops_backend_and_completes() {
    let factory = ScriptedBackendFactory::new(ScriptedConfig::new(["A", "B", "</s>", "C", "D"]));
    let h = Harness::new(factory);
    h.session.select_model(ModelSelection::new(LLAVA, TOKENIZER));
    let (events, outcome) = h.ask("describe").await;

    assert_eq!(delivered(&events), "AB");
    assert!(outcome.is_completed());
    let backend = h.backend();
    assert_eq!(backend.kind(), BackendKind::Multimodal);
    assert!(backend.stop_calls() >= 1);
    assert!(backend.prompts()[0].ends_with("<|start_header_id|>assistant<|end_header_id|> ASSISTANT"));
    assert_eq!(h.memory.len().await, 1);
}

// ── Cancellation ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_generation_keeps_partial_text() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["Hel", "lo", "never", "seen"]).pause_after(2),
    ));
    let handle = h.session.start(GenerationRequest::new("Greet me")).await.unwrap();
    let backend = h.backend();
    wait_paused(&backend).await;

    h.session.stop();
    backend.resume();

    let mut events = Vec::new();
    let outcome = handle.wait_with(|e| events.push(e.clone())).await;
    assert_eq!(
        outcome,
        GenerationOutcome::Cancelled {
            text: "Hello".into(),
            tokens: 2
        }
    );
    assert_eq!(delivered(&events), "Hello");
    assert!(backend.stop_calls() >= 1);
    assert_eq!(
        h.memory.transcript().await,
        "User: Greet me\nAssistant: Hello\n"
    );
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_stop_equals_single_stop() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["Hel", "lo", "never", "seen"]).pause_after(2),
    ));
    let handle = h.session.start(GenerationRequest::new("Greet me")).await.unwrap();
    let backend = h.backend();
    wait_paused(&backend).await;

    h.session.stop();
    h.session.stop();
    h.session.stop();
    backend.resume();

    assert_eq!(
        handle.wait().await,
        GenerationOutcome::Cancelled {
            text: "Hello".into(),
            tokens: 2
        }
    );
    assert_eq!(h.memory.len().await, 1);
}

#[tokio::test]
async fn stop_while_idle_does_not_affect_next_request() {
    let h = Harness::new(scripted(["fine"]));
    h.session.stop();
    h.session.stop();
    let (_, outcome) = h.ask("hi").await;
    assert!(outcome.is_completed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_before_generate_skips_backend() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["never"]).pause_on_load(),
    ));
    let handle = h.session.start(GenerationRequest::new("hi")).await.unwrap();
    let backend = h.backend();
    wait_paused(&backend).await;

    h.session.stop();
    backend.resume();

    let mut events = Vec::new();
    let outcome = handle.wait_with(|e| events.push(e.clone())).await;
    assert!(matches!(outcome, GenerationOutcome::Cancelled { ref text, .. } if text.is_empty()));
    assert_eq!(backend.generate_calls(), 0);
    assert!(h.memory.is_empty().await);
    assert!(!events.iter().any(|e| e.event_type() == "delta"));
    assert_eq!(h.session.state(), SessionState::Idle);
}

// ── Failures ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn load_failure_fails_without_memory() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["x"]).fail_load(LoadError::OutOfMemory("model needs 8GB".into())),
    ));
    let (events, outcome) = h.ask("hi").await;

    match outcome {
        GenerationOutcome::Failed { category, code, .. } => {
            assert_eq!(category, ErrorCategory::Load);
            assert_eq!(code, "load.out_of_memory");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!events.iter().any(|e| e.event_type() == "model_loaded"));
    assert_eq!(h.backend().generate_calls(), 0);
    assert_eq!(h.backend().load_calls(), 1);
    assert!(h.memory.is_empty().await);
    assert_eq!(h.session.state(), SessionState::Idle);

    // The next request tries again.
    h.ask("again").await;
    assert_eq!(h.backend().load_calls(), 2);
}

#[tokio::test]
async fn generation_failure_keeps_deltas_but_not_memory() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["a", "b", "c", "d", "e"])
            .fail_generate_after(4, GenerationError::Engine("kv cache overflow".into())),
    ));
    let (events, outcome) = h.ask("hi").await;

    assert_eq!(delivered(&events), "abcd");
    match outcome {
        GenerationOutcome::Failed { category, code, message } => {
            assert_eq!(category, ErrorCategory::Generation);
            assert_eq!(code, "generation.engine");
            assert!(message.contains("kv cache overflow"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.memory.is_empty().await);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn backend_panic_is_internal_failure() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["x"]).panic_on_generate(),
    ));
    let (_, outcome) = h.ask("hi").await;
    assert!(matches!(
        outcome,
        GenerationOutcome::Failed { category: ErrorCategory::Internal, .. }
    ));
    assert!(h.memory.is_empty().await);
    assert_eq!(h.session.state(), SessionState::Idle);

    // The session is usable afterwards.
    assert!(h.session.start(GenerationRequest::new("again")).await.is_ok());
}

// ── Rejections ────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let h = Harness::new(scripted(["x"]));
    for text in ["", "   ", "\n\t"] {
        let err = h.session.start(GenerationRequest::new(text)).await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyPrompt));
    }
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn start_without_model_is_rejected() {
    let session = GenerationSession::new(
        SessionConfig::default(),
        Arc::new(KnowledgeBase::empty()),
        Arc::new(ConversationMemory::new()),
        Arc::new(scripted(["x"])),
    );
    let err = session.start(GenerationRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.code(), "session.no_model");
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_request_is_busy() {
    let h = Harness::new(ScriptedBackendFactory::new(
        ScriptedConfig::new(["a", "b"]).pause_after(0),
    ));
    let first = h.session.start(GenerationRequest::new("one")).await.unwrap();
    let backend = h.backend();
    wait_paused(&backend).await;

    let err = h.session.start(GenerationRequest::new("two")).await.unwrap_err();
    assert!(matches!(err, SessionError::Busy));
    assert_eq!(h.session.state(), SessionState::Streaming);

    backend.resume();
    assert!(first.wait().await.is_completed());
    assert_eq!(h.memory.len().await, 1);
    assert_eq!(backend.generate_calls(), 1);
}

#[tokio::test]
async fn bad_image_is_rejected_and_releases_session() {
    let h = Harness::new(scripted(["x"]));
    h.session.select_model(ModelSelection::new(LLAVA, TOKENIZER));
    let request = GenerationRequest::new("what is this?")
        .with_image(DynamicImage::ImageRgba8(RgbaImage::new(0, 0)));
    let err = h.session.start(request).await.unwrap_err();
    assert_eq!(err.code(), "image.no_pixel_buffer");
    assert_eq!(h.session.state(), SessionState::Idle);

    let (_, outcome) = h.ask("still works").await;
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn oversized_image_is_rejected_before_loading() {
    let h = Harness::new(scripted(["x"]));
    h.session.select_model(ModelSelection::new(LLAVA, TOKENIZER));
    let strip = DynamicImage::ImageRgba8(RgbaImage::new(1, 10_000));
    let err = h
        .session
        .start(GenerationRequest::new("what is this?").with_image(strip))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Image(ImageError::TooLarge { .. })));
    assert_eq!(err.code(), "image.too_large");
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.backend().load_calls(), 0);
}

// ── Images ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_is_resized_for_multimodal_backend() {
    let h = Harness::new(scripted(["A painting."]));
    h.session.select_model(ModelSelection::new(LLAVA, TOKENIZER));
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(672, 448, Rgba([1, 2, 3, 255])));
    let handle = h
        .session
        .start(GenerationRequest::new("what is this?").with_image(image))
        .await
        .unwrap();
    assert_eq!(handle.kind(), BackendKind::Multimodal);
    assert!(handle.wait().await.is_completed());
    assert_eq!(h.backend().images(), vec![Some((336, 224))]);
}

#[tokio::test]
async fn text_backend_ignores_image() {
    let h = Harness::new(scripted(["ok"]));
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
    let outcome = h
        .session
        .start(GenerationRequest::new("hi").with_image(image))
        .await
        .unwrap()
        .wait()
        .await;
    assert!(outcome.is_completed());
    assert_eq!(h.backend().images(), vec![None]);
}

// ── Model selection ───────────────────────────────────────────────────────

#[tokio::test]
async fn selecting_while_idle_discards_handles() {
    let h = Harness::new(scripted(["x"]));
    h.ask("one").await;
    let old = h.backend();

    let outcome = h
        .session
        .select_model(ModelSelection::new("/models/llama-3.1-8b.gguf", TOKENIZER));
    assert_eq!(outcome, SelectionOutcome::Applied);
    h.ask("two").await;

    let new = h.backend();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.load_calls(), 1);
    assert_eq!(old.generate_calls(), 1);
    assert_eq!(h.factory.created().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn selecting_during_generation_is_deferred() {
    let h = Harness::new(
        ScriptedBackendFactory::new(ScriptedConfig::new(["a", "b"]).pause_after(1))
            .with_kind(BackendKind::Multimodal, ScriptedConfig::new(["seen"])),
    );
    let handle = h.session.start(GenerationRequest::new("one")).await.unwrap();
    let running = h.backend();
    wait_paused(&running).await;

    let outcome = h.session.select_model(ModelSelection::new(LLAVA, TOKENIZER));
    assert_eq!(outcome, SelectionOutcome::Deferred);
    assert_eq!(h.session.selection().unwrap().kind, BackendKind::Text);

    running.resume();
    assert_eq!(handle.wait().await.text(), Some("ab"));

    // Applied once the session went back to idle.
    assert_eq!(h.session.selection().unwrap().kind, BackendKind::Multimodal);
    h.ask("two").await;
    assert_eq!(h.backend().kind(), BackendKind::Multimodal);
    assert_eq!(running.generate_calls(), 1);
}

// ── Domain events ─────────────────────────────────────────────────────────

#[tokio::test]
async fn publishes_domain_events() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let factory = Arc::new(scripted(["fine"]));
    let session = GenerationSession::new(
        SessionConfig::default(),
        Arc::new(KnowledgeBase::empty()),
        Arc::new(ConversationMemory::new()),
        factory,
    )
    .with_event_bus(bus.clone());
    session.select_model(ModelSelection::new(LLAMA, TOKENIZER));
    session
        .start(GenerationRequest::new("hi"))
        .await
        .unwrap()
        .wait()
        .await;

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(match event.as_ref() {
            DomainEvent::BackendsInvalidated { .. } => "invalidated",
            DomainEvent::GenerationStarted { .. } => "started",
            DomainEvent::ModelLoaded { .. } => "loaded",
            DomainEvent::MemoryAppended { sequence, .. } => {
                assert_eq!(*sequence, 0);
                "remembered"
            }
            DomainEvent::GenerationFinished { status, .. } => {
                assert_eq!(status, "completed");
                "finished"
            }
            _ => "other",
        });
    }
    assert_eq!(
        names,
        vec!["invalidated", "started", "loaded", "remembered", "finished"]
    );
}
