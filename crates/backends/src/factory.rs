//! Backend factory: builds the engine for a model selection.

use crate::unsupported::UnsupportedBackend;
use llamart_config::GenerationConfig;
use llamart_core::backend::{Backend, BackendFactory, BackendKind, ModelSelection};
use std::sync::Arc;
use tracing::debug;

/// Sampling knobs for engines that sample locally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    /// 0.0 selects greedy decoding
    pub temperature: f32,
    pub seed: u64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            seed: 42,
        }
    }
}

/// Factory for the on-device engines compiled into this build.
///
/// With the `local` feature, text-family selections get a
/// [`CandleTextBackend`](crate::CandleTextBackend). Selections no engine
/// handles get an [`UnsupportedBackend`] whose `load` explains why.
#[derive(Debug, Clone, Default)]
pub struct LocalBackendFactory {
    sampling: SamplingOptions,
}

impl LocalBackendFactory {
    pub fn new(sampling: SamplingOptions) -> Self {
        Self { sampling }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(SamplingOptions {
            temperature: config.temperature,
            seed: config.seed,
        })
    }

    pub fn sampling(&self) -> SamplingOptions {
        self.sampling
    }
}

impl BackendFactory for LocalBackendFactory {
    fn create(&self, selection: &ModelSelection) -> Arc<dyn Backend> {
        debug!(
            kind = %selection.kind,
            model = %selection.model_path.display(),
            "Creating backend"
        );
        match selection.kind {
            #[cfg(feature = "local")]
            BackendKind::Text => Arc::new(crate::local::CandleTextBackend::new(
                selection.model_path.clone(),
                selection.tokenizer_path.clone(),
                self.sampling,
            )),
            #[cfg(not(feature = "local"))]
            BackendKind::Text => Arc::new(UnsupportedBackend::new(
                BackendKind::Text,
                "text models need the `local` feature (rebuild with --features local)",
            )),
            BackendKind::Multimodal => Arc::new(UnsupportedBackend::new(
                BackendKind::Multimodal,
                "no multimodal engine is compiled into this build",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_copies_sampling() {
        let config = GenerationConfig {
            temperature: 0.0,
            seed: 7,
            ..GenerationConfig::default()
        };
        let factory = LocalBackendFactory::from_config(&config);
        assert_eq!(
            factory.sampling(),
            SamplingOptions {
                temperature: 0.0,
                seed: 7
            }
        );
    }

    #[test]
    fn multimodal_selection_is_unsupported() {
        let factory = LocalBackendFactory::default();
        let backend = factory.create(&ModelSelection::new("/m/llava.pte", "/m/tok.bin"));
        assert_eq!(backend.kind(), BackendKind::Multimodal);
        let err = backend.load().unwrap_err();
        assert_eq!(err.code(), "load.unsupported_format");
    }

    #[test]
    fn text_selection_keeps_its_kind() {
        let factory = LocalBackendFactory::default();
        let backend = factory.create(&ModelSelection::new("/m/Llama-3.gguf", "/m/tok.json"));
        assert_eq!(backend.kind(), BackendKind::Text);
        assert!(!backend.is_loaded());
    }

    #[cfg(not(feature = "local"))]
    #[test]
    fn text_without_engine_mentions_feature() {
        let factory = LocalBackendFactory::default();
        let backend = factory.create(&ModelSelection::new("/m/llama.gguf", "/m/tok.json"));
        assert!(backend.load().unwrap_err().to_string().contains("local"));
    }
}
