//! Scripted backend: replays canned token sequences.
//!
//! Behaves like a real runner from the session's point of view: the first
//! callback of every generate call echoes the prompt, tokens arrive one at a
//! time on the calling thread, and `stop()` ends generation at the next
//! token boundary. Used by `llamart chat --scripted` and by tests, which can
//! also inject load/generate failures and pause generation mid-stream.

use crate::lock;
use llamart_core::backend::{Backend, BackendFactory, BackendKind, ModelSelection};
use llamart_core::error::{GenerationError, LoadError};
use llamart_core::image::PlanarRgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::debug;

/// What a scripted backend does on each call.
#[derive(Debug, Clone)]
pub struct ScriptedConfig {
    responses: Vec<Vec<String>>,
    echo_prompt: bool,
    load_failure: Option<LoadError>,
    generate_failure: Option<(usize, GenerationError)>,
    pause_after: Option<usize>,
    pause_on_load: bool,
    panic_on_generate: bool,
}

impl ScriptedConfig {
    /// Every generate call replays `tokens`.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: vec![tokens.into_iter().map(Into::into).collect()],
            echo_prompt: true,
            load_failure: None,
            generate_failure: None,
            pause_after: None,
            pause_on_load: false,
            panic_on_generate: false,
        }
    }

    /// Split `text` into word tokens, keeping the separating spaces.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.split_inclusive(' '))
    }

    /// Queue another response. Call `n` uses response `n`; the last one
    /// repeats once the queue is exhausted.
    pub fn then<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses
            .push(tokens.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_echo(mut self) -> Self {
        self.echo_prompt = false;
        self
    }

    pub fn fail_load(mut self, error: LoadError) -> Self {
        self.load_failure = Some(error);
        self
    }

    /// Emit `after` tokens, then fail the generate call with `error`.
    pub fn fail_generate_after(mut self, after: usize, error: GenerationError) -> Self {
        self.generate_failure = Some((after, error));
        self
    }

    /// Block the first generate call after `tokens` tokens until
    /// [`ScriptedBackend::resume`] is called.
    pub fn pause_after(mut self, tokens: usize) -> Self {
        self.pause_after = Some(tokens);
        self
    }

    /// Block `load` until [`ScriptedBackend::resume`] is called.
    pub fn pause_on_load(mut self) -> Self {
        self.pause_on_load = true;
        self
    }

    pub fn panic_on_generate(mut self) -> Self {
        self.panic_on_generate = true;
        self
    }

    fn response(&self, call: usize) -> &[String] {
        let index = call.min(self.responses.len().saturating_sub(1));
        self.responses.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
struct Gate {
    paused: bool,
    released: bool,
}

/// A backend that replays a [`ScriptedConfig`].
pub struct ScriptedBackend {
    kind: BackendKind,
    config: ScriptedConfig,
    loaded: AtomicBool,
    stop_requested: AtomicBool,
    load_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    images: Mutex<Vec<Option<(u32, u32)>>>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
}

impl ScriptedBackend {
    pub fn new(kind: BackendKind, config: ScriptedConfig) -> Self {
        Self {
            kind,
            config,
            loaded: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            load_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            gate: Mutex::new(Gate::default()),
            gate_changed: Condvar::new(),
        }
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Every prompt passed to `generate`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Dimensions of the image passed to each `generate` call.
    pub fn images(&self) -> Vec<Option<(u32, u32)>> {
        lock(&self.images).clone()
    }

    /// Wait until a paused call is parked. Returns `false` on timeout.
    pub fn wait_until_paused(&self, timeout: Duration) -> bool {
        let gate = lock(&self.gate);
        let (gate, _) = self
            .gate_changed
            .wait_timeout_while(gate, timeout, |g| !g.paused)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        gate.paused
    }

    /// Let a paused call continue. Later calls no longer pause.
    pub fn resume(&self) {
        let mut gate = lock(&self.gate);
        gate.released = true;
        self.gate_changed.notify_all();
    }

    fn park(&self) {
        let mut gate = lock(&self.gate);
        if gate.released {
            return;
        }
        gate.paused = true;
        self.gate_changed.notify_all();
        let mut gate = self
            .gate_changed
            .wait_while(gate, |g| !g.released)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        gate.paused = false;
    }
}

impl Backend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn load(&self) -> Result<(), LoadError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.pause_on_load {
            self.park();
        }
        if let Some(error) = &self.config.load_failure {
            return Err(error.clone());
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn generate(
        &self,
        prompt: &str,
        image: Option<&PlanarRgbImage>,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<(), GenerationError> {
        let call = self.generate_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.images).push(image.map(|i| (i.width(), i.height())));

        if !self.is_loaded() {
            return Err(GenerationError::NotLoaded);
        }
        if self.config.panic_on_generate {
            panic!("scripted backend panicked during generate");
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        if self.config.echo_prompt {
            on_token(prompt);
        }

        for (index, token) in self.config.response(call).iter().take(max_tokens).enumerate() {
            if let Some((after, error)) = &self.config.generate_failure {
                if index == *after {
                    return Err(error.clone());
                }
            }
            if self.config.pause_after == Some(index) {
                self.park();
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                debug!(kind = %self.kind, emitted = index, "Scripted generation stopped");
                return Ok(());
            }
            on_token(token);
        }

        if let Some((after, error)) = &self.config.generate_failure {
            if *after >= self.config.response(call).len() {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`ScriptedBackend`]s, remembering each one it built.
pub struct ScriptedBackendFactory {
    default: ScriptedConfig,
    per_kind: HashMap<BackendKind, ScriptedConfig>,
    created: Mutex<Vec<Arc<ScriptedBackend>>>,
}

impl ScriptedBackendFactory {
    pub fn new(config: ScriptedConfig) -> Self {
        Self {
            default: config,
            per_kind: HashMap::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Use `config` for backends of `kind` instead of the default.
    pub fn with_kind(mut self, kind: BackendKind, config: ScriptedConfig) -> Self {
        self.per_kind.insert(kind, config);
        self
    }

    /// Every backend created so far, oldest first.
    pub fn created(&self) -> Vec<Arc<ScriptedBackend>> {
        lock(&self.created).clone()
    }

    pub fn last_created(&self) -> Option<Arc<ScriptedBackend>> {
        lock(&self.created).last().cloned()
    }
}

impl BackendFactory for ScriptedBackendFactory {
    fn create(&self, selection: &ModelSelection) -> Arc<dyn Backend> {
        let config = self
            .per_kind
            .get(&selection.kind)
            .unwrap_or(&self.default)
            .clone();
        let backend = Arc::new(ScriptedBackend::new(selection.kind, config));
        lock(&self.created).push(backend.clone());
        backend
    }
}
