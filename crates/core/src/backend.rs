//! Backend trait: the abstraction over on-device inference engines.
//!
//! A Backend knows how to load one model family into memory and stream
//! generated tokens for a prompt through a callback. Two families exist:
//! a text-only model and a multimodal (text + image) model. The session
//! layer owns one lazily created handle per family and never looks inside.
//!
//! Routing between the families is decided once, when a model path is
//! accepted, and carried around as a [`BackendKind`].

use crate::error::{GenerationError, LoadError, SelectionError};
use crate::image::PlanarRgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Case-insensitive path marker identifying the text-only model family.
const TEXT_MODEL_MARKER: &str = "llama";

/// Which model family a backend serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Text-only Llama 3 family.
    Text,
    /// Text + image (LLaVA) family.
    Multimodal,
}

/// What the session does when a backend emits its end-of-sequence marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfSequencePolicy {
    /// Request cancellation and stop the backend immediately.
    StopBackend,
    /// Keep accepting callbacks but forward nothing further. The text-only
    /// runner keeps generating after `<|eot_id|>`; it is left to terminate
    /// on its own.
    SuppressDelivery,
}

impl BackendKind {
    /// Derive the model family from a model file path.
    ///
    /// Paths containing `llama` (any case) route to [`BackendKind::Text`],
    /// everything else to [`BackendKind::Multimodal`].
    pub fn from_model_path(path: impl AsRef<Path>) -> Self {
        let lowered = path.as_ref().to_string_lossy().to_lowercase();
        if lowered.contains(TEXT_MODEL_MARKER) {
            Self::Text
        } else {
            Self::Multimodal
        }
    }

    /// The literal token the backend emits once generation is logically done.
    pub fn end_of_sequence(&self) -> &'static str {
        match self {
            Self::Text => "<|eot_id|>",
            Self::Multimodal => "</s>",
        }
    }

    pub fn end_of_sequence_policy(&self) -> EndOfSequencePolicy {
        match self {
            Self::Text => EndOfSequencePolicy::SuppressDelivery,
            Self::Multimodal => EndOfSequencePolicy::StopBackend,
        }
    }

    /// Marker appended to the assembled prompt before it reaches the backend.
    pub fn prompt_suffix(&self) -> &'static str {
        match self {
            Self::Text => "",
            Self::Multimodal => " ASSISTANT",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Multimodal => "multimodal",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated model + tokenizer pair with its routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub kind: BackendKind,
}

impl ModelSelection {
    /// Build a selection without touching the file system.
    pub fn new(model_path: impl Into<PathBuf>, tokenizer_path: impl Into<PathBuf>) -> Self {
        let model_path = model_path.into();
        let kind = BackendKind::from_model_path(&model_path);
        Self {
            model_path,
            tokenizer_path: tokenizer_path.into(),
            kind,
        }
    }

    /// Build a selection from user-supplied paths, checking that both name
    /// readable files.
    pub fn from_paths(
        model_path: impl Into<PathBuf>,
        tokenizer_path: impl Into<PathBuf>,
    ) -> Result<Self, SelectionError> {
        let model_path = model_path.into();
        let tokenizer_path = tokenizer_path.into();
        check_readable(&model_path, "model")?;
        check_readable(&tokenizer_path, "tokenizer")?;
        Ok(Self::new(model_path, tokenizer_path))
    }
}

fn check_readable(path: &Path, what: &'static str) -> Result<(), SelectionError> {
    if path.as_os_str().is_empty() {
        return Err(SelectionError::NoFileChosen(what));
    }
    let meta = std::fs::metadata(path).map_err(|e| SelectionError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_file() {
        return Err(SelectionError::Unreadable {
            path: path.to_path_buf(),
            reason: "not a regular file".into(),
        });
    }
    std::fs::File::open(path).map_err(|e| SelectionError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// The core Backend trait.
///
/// Every method takes `&self`: `stop()` must be callable from another thread
/// while `generate()` is blocked on the background context, so
/// implementations keep their mutable state behind interior mutability.
pub trait Backend: Send + Sync {
    /// The model family this backend serves.
    fn kind(&self) -> BackendKind;

    /// Load model weights and tokenizer. Potentially long-running.
    fn load(&self) -> Result<(), LoadError>;

    fn is_loaded(&self) -> bool;

    /// Generate a continuation of `prompt`, invoking `on_token` once per
    /// produced token, synchronously and in generation order. Blocks until
    /// generation ends, either naturally or after [`Backend::stop`].
    fn generate(
        &self,
        prompt: &str,
        image: Option<&PlanarRgbImage>,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<(), GenerationError>;

    /// Ask a running `generate` call to end. Idempotent; a bounded number of
    /// further tokens may still arrive.
    fn stop(&self);
}

/// Creates backend handles for a model selection. Creation never fails;
/// problems with the model surface from [`Backend::load`].
pub trait BackendFactory: Send + Sync {
    fn create(&self, selection: &ModelSelection) -> Arc<dyn Backend>;
}
