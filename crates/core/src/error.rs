//! Error types for the Llamart domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; every error exposes a stable
//! [`ErrorCategory`] and a dotted `code()` so callers can render a
//! user-facing message without parsing display strings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The top-level error type for all Llamart operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend lifecycle ---
    #[error("Model loading failed: {0}")]
    Load(#[from] LoadError),

    #[error("Text generation failed: {0}")]
    Generation(#[from] GenerationError),

    // --- Knowledge base ---
    #[error("Knowledge base unavailable: {0}")]
    Knowledge(#[from] KnowledgeLoadError),

    // --- Model / tokenizer selection ---
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    // --- Image pre-processing ---
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Load(_) => ErrorCategory::Load,
            Self::Generation(_) => ErrorCategory::Generation,
            Self::Knowledge(_) => ErrorCategory::Knowledge,
            Self::Selection(_) => ErrorCategory::Selection,
            Self::Image(_) => ErrorCategory::Image,
            Self::Config { .. } => ErrorCategory::Config,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Stable machine-readable code, e.g. `load.invalid_path`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Load(e) => e.code(),
            Self::Generation(e) => e.code(),
            Self::Knowledge(e) => e.code(),
            Self::Selection(e) => e.code(),
            Self::Image(e) => e.code(),
            Self::Config { .. } => "config.invalid",
            Self::Internal(_) => "internal",
        }
    }
}

/// Coarse error category surfaced to callers alongside every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Load,
    Generation,
    Knowledge,
    Selection,
    Image,
    Config,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Generation => "generation",
            Self::Knowledge => "knowledge",
            Self::Selection => "selection",
            Self::Image => "image",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

/// Failure to bring a backend's model into memory. Fatal to the current
/// request only.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("invalid model or tokenizer path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("out of memory while loading model: {0}")]
    OutOfMemory(String),

    #[error("inference engine error: {0}")]
    Engine(String),
}

impl LoadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "load.invalid_path",
            Self::UnsupportedFormat(_) => "load.unsupported_format",
            Self::OutOfMemory(_) => "load.out_of_memory",
            Self::Engine(_) => "load.engine",
        }
    }
}

/// Backend-internal failure during a generate call.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("backend is not loaded")]
    NotLoaded,

    #[error("inference engine error: {0}")]
    Engine(String),

    #[error("generation interrupted: {0}")]
    Interrupted(String),
}

impl GenerationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLoaded => "generation.not_loaded",
            Self::Engine(_) => "generation.engine",
            Self::Interrupted(_) => "generation.interrupted",
        }
    }
}

/// The knowledge source could not be read. Non-fatal: retrieval degrades to
/// an empty result set.
#[derive(Debug, Clone, Error)]
pub enum KnowledgeLoadError {
    #[error("failed to read knowledge source at {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

impl KnowledgeLoadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "knowledge.read",
        }
    }
}

/// A model or tokenizer file could not be selected. No state changes.
#[derive(Debug, Clone, Error)]
pub enum SelectionError {
    #[error("no {0} file chosen")]
    NoFileChosen(&'static str),

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

impl SelectionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoFileChosen(_) => "selection.no_file",
            Self::Unreadable { .. } => "selection.unreadable",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("source bitmap has no decodable pixel buffer")]
    NoPixelBuffer,

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("plane buffer has {actual} bytes, expected {expected}")]
    InvalidPlanes { expected: usize, actual: usize },

    #[error("{width}x{height} image would resize to height {resized}, limit is {max}")]
    TooLarge {
        width: u32,
        height: u32,
        resized: u32,
        max: u32,
    },

    #[error("image preparation did not finish: {0}")]
    Aborted(String),
}

impl ImageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoPixelBuffer => "image.no_pixel_buffer",
            Self::Decode(_) => "image.decode",
            Self::InvalidPlanes { .. } => "image.invalid_planes",
            Self::TooLarge { .. } => "image.too_large",
            Self::Aborted(_) => "image.aborted",
        }
    }
}
