//! Placeholder backend for model families no engine is compiled in for.

use llamart_core::backend::{Backend, BackendKind};
use llamart_core::error::{GenerationError, LoadError};
use llamart_core::image::PlanarRgbImage;

/// A backend that always fails to load, explaining why.
pub struct UnsupportedBackend {
    kind: BackendKind,
    reason: String,
}

impl UnsupportedBackend {
    pub fn new(kind: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl Backend for UnsupportedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn load(&self) -> Result<(), LoadError> {
        Err(LoadError::UnsupportedFormat(self.reason.clone()))
    }

    fn is_loaded(&self) -> bool {
        false
    }

    fn generate(
        &self,
        _prompt: &str,
        _image: Option<&PlanarRgbImage>,
        _max_tokens: usize,
        _on_token: &mut dyn FnMut(&str),
    ) -> Result<(), GenerationError> {
        Err(GenerationError::NotLoaded)
    }

    fn stop(&self) {}
}
