//! Local text engine: runs GGUF-quantized Llama models through Candle.
//!
//! Uses [Candle](https://github.com/huggingface/candle) on the CPU. The model
//! is loaded on demand and kept behind a mutex: Candle inference on one set
//! of weights is single-threaded, and the session never runs two generate
//! calls on the same backend at once.
//!
//! Follows the runner contract the session relies on: the first callback of
//! a generate call echoes the prompt, every sampled token is decoded and
//! delivered as soon as it forms valid text, and the end-of-turn token is
//! delivered literally (`<|eot_id|>`) before generation returns.

use crate::factory::SamplingOptions;
use crate::lock;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use llamart_core::backend::{Backend, BackendKind};
use llamart_core::error::{GenerationError, LoadError};
use llamart_core::image::PlanarRgbImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// A text backend running a quantized Llama model via Candle.
pub struct CandleTextBackend {
    model_path: PathBuf,
    tokenizer_path: PathBuf,
    sampling: SamplingOptions,
    state: Mutex<Option<LoadedModel>>,
    stop_requested: AtomicBool,
}

/// Weights, tokenizer and the token that ends an assistant turn.
struct LoadedModel {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
}

impl CandleTextBackend {
    /// Create an unloaded backend. Nothing is read until [`Backend::load`].
    pub fn new(model_path: PathBuf, tokenizer_path: PathBuf, sampling: SamplingOptions) -> Self {
        Self {
            model_path,
            tokenizer_path,
            sampling,
            state: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        }
    }
}

impl LoadedModel {
    fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self, LoadError> {
        let device = Device::Cpu;
        info!(path = %model_path.display(), "Loading local GGUF model");

        let mut file = std::fs::File::open(model_path).map_err(|e| LoadError::InvalidPath {
            path: model_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let gguf = gguf_file::Content::read(&mut file).map_err(|e| {
            LoadError::UnsupportedFormat(format!(
                "{} is not a GGUF file: {e}",
                model_path.display()
            ))
        })?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| LoadError::Engine(format!("failed to load model weights: {e}")))?;

        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| LoadError::InvalidPath {
                path: tokenizer_path.to_path_buf(),
                reason: format!("failed to load tokenizer: {e}"),
            })?;

        let eos_token_id = tokenizer
            .token_to_id(BackendKind::Text.end_of_sequence())
            .or_else(|| tokenizer.token_to_id("<|end_of_text|>"))
            .or_else(|| tokenizer.token_to_id("</s>"))
            .unwrap_or_else(|| {
                warn!("Tokenizer has no end-of-turn token, falling back to id 2");
                2
            });

        info!(eos_token_id, "Local model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            eos_token_id,
        })
    }

    /// Sample until the end-of-turn token, the sequence budget, or a stop.
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        sampling: SamplingOptions,
        stop_requested: &AtomicBool,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<(), GenerationError> {
        on_token(prompt);

        // The assembled prompt already carries its special tokens.
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| GenerationError::Engine(format!("tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids();

        // `max_tokens` is the whole sequence: prompt plus completion.
        let budget = max_tokens.saturating_sub(prompt_tokens.len());
        if budget == 0 {
            return Err(GenerationError::Engine(format!(
                "prompt of {} tokens leaves no room in a {max_tokens}-token sequence",
                prompt_tokens.len()
            )));
        }

        debug!(
            prompt_tokens = prompt_tokens.len(),
            budget,
            temperature = sampling.temperature,
            "Starting local generation"
        );

        let temperature = (sampling.temperature > 0.0).then_some(f64::from(sampling.temperature));
        let mut logits_processor = LogitsProcessor::new(sampling.seed, temperature, None);

        let mut input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut position = 0usize;
        let mut generated: Vec<u32> = Vec::new();
        let mut delivered = 0usize;

        for _ in 0..budget {
            if stop_requested.load(Ordering::SeqCst) {
                debug!(generated = generated.len(), "Local generation stopped");
                return Ok(());
            }

            let logits = self
                .model
                .forward(&input, position)
                .map_err(map_candle_err)?;
            position += input.dim(1).map_err(map_candle_err)?;

            let logits = logits.squeeze(0).map_err(map_candle_err)?;
            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;

            if next_token == self.eos_token_id {
                on_token(BackendKind::Text.end_of_sequence());
                break;
            }
            generated.push(next_token);

            // Decode the whole completion so multi-token characters come out
            // whole; only the new suffix is delivered.
            let text = self
                .tokenizer
                .decode(&generated, true)
                .map_err(|e| GenerationError::Engine(format!("detokenization failed: {e}")))?;
            if text.len() > delivered && text.is_char_boundary(delivered) {
                on_token(&text[delivered..]);
                delivered = text.len();
            }

            input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        debug!(generated = generated.len(), "Local generation complete");
        Ok(())
    }
}

/// Map Candle errors to GenerationError.
fn map_candle_err(e: candle_core::Error) -> GenerationError {
    GenerationError::Engine(format!("candle inference error: {e}"))
}

impl Backend for CandleTextBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Text
    }

    fn load(&self) -> Result<(), LoadError> {
        let started = Instant::now();
        let loaded = LoadedModel::load(&self.model_path, &self.tokenizer_path)?;
        *lock(&self.state) = Some(loaded);
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Text backend ready");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        lock(&self.state).is_some()
    }

    fn generate(
        &self,
        prompt: &str,
        image: Option<&PlanarRgbImage>,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<(), GenerationError> {
        if image.is_some() {
            warn!("Text backend ignores image input");
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        let mut state = lock(&self.state);
        let model = state.as_mut().ok_or(GenerationError::NotLoaded)?;
        model.generate(
            prompt,
            max_tokens,
            self.sampling,
            &self.stop_requested,
            on_token,
        )
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}
