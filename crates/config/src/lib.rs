//! Configuration loading, validation, and management for Llamart.
//!
//! Loads configuration from `~/.llamart/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use llamart_core::backend::ModelSelection;
use llamart_core::error::SelectionError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.llamart/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model and tokenizer selection
    #[serde(default)]
    pub model: ModelConfig,

    /// Generation and streaming settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Knowledge base source
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// System prompt content
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the model file. Routing between the text and multimodal
    /// backends is derived from this path.
    #[serde(default)]
    pub model_path: String,

    /// Path to the tokenizer file
    #[serde(default)]
    pub tokenizer_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sequence length budget handed to the backend as `max_tokens`
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,

    /// Buffered tokens are flushed once the buffer holds more than this
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Width images are resized to before reaching the multimodal backend
    #[serde(default = "default_image_width")]
    pub image_width: u32,

    /// Images whose resized height would exceed this are rejected
    #[serde(default = "default_max_image_height")]
    pub max_image_height: u32,

    /// Capacity of the per-request event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Sampling temperature for the local engine (0.0 = greedy)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sampling seed for the local engine
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_sequence_length() -> usize {
    2048
}
fn default_flush_threshold() -> usize {
    2
}
fn default_image_width() -> u32 {
    336
}
fn default_max_image_height() -> u32 {
    4096
}
fn default_channel_capacity() -> usize {
    64
}
fn default_temperature() -> f32 {
    0.7
}
fn default_seed() -> u64 {
    42
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sequence_length: default_sequence_length(),
            flush_threshold: default_flush_threshold(),
            image_width: default_image_width(),
            max_image_height: default_max_image_height(),
            channel_capacity: default_channel_capacity(),
            temperature: default_temperature(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Knowledge source file; defaults to `~/.llamart/knowledge.csv`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Character separating title from description on each line
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: default_delimiter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Role description opening the system message
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Fixed reference paragraph placed at the top of the documents block
    #[serde(default = "default_background")]
    pub background: String,
}

pub fn default_persona() -> String {
    concat!(
        "You are a helpful AI art assistant, called Llam4rt, the user will ask you ",
        "questions about paintings. You have been tasked with helping us to answer ",
        "the user input.\n",
        "You have been specifically trained on the Musée de l'Orangerie in Paris."
    )
    .into()
}

pub fn default_background() -> String {
    concat!(
        "Musée de l'Orangerie:\n",
        "The Musée de l'Orangerie (English: Orangery Museum) is an art gallery of ",
        "Impressionist and Post-Impressionist paintings located in the west corner of ",
        "the Tuileries Garden next to the Place de la Concorde in Paris. The museum is ",
        "most famous as the permanent home of eight large Water Lilies murals by Claude ",
        "Monet, and also contains works by Paul Cézanne, Henri Matisse, Amedeo ",
        "Modigliani, Pablo Picasso, Pierre-Auguste Renoir, Henri Rousseau, Alfred ",
        "Sisley, Chaïm Soutine, Maurice Utrillo, and others."
    )
    .into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            background: default_background(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.llamart/config.toml).
    ///
    /// Environment variables override the file:
    /// - `LLAMART_MODEL_PATH`
    /// - `LLAMART_TOKENIZER_PATH`
    /// - `LLAMART_KNOWLEDGE_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("LLAMART_MODEL_PATH") {
            self.model.model_path = model;
        }
        if let Ok(tokenizer) = std::env::var("LLAMART_TOKENIZER_PATH") {
            self.model.tokenizer_path = tokenizer;
        }
        if let Ok(knowledge) = std::env::var("LLAMART_KNOWLEDGE_PATH") {
            self.knowledge.path = Some(PathBuf::from(knowledge));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".llamart")
    }

    /// Resolved knowledge source path.
    pub fn knowledge_path(&self) -> PathBuf {
        self.knowledge
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("knowledge.csv"))
    }

    /// The configured model selection, validated against the file system.
    pub fn model_selection(&self) -> Result<ModelSelection, SelectionError> {
        ModelSelection::from_paths(&self.model.model_path, &self.model.tokenizer_path)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let generation = &self.generation;
        if generation.sequence_length == 0 {
            return Err(ConfigError::ValidationError(
                "generation.sequence_length must be > 0".into(),
            ));
        }
        if generation.image_width == 0 {
            return Err(ConfigError::ValidationError(
                "generation.image_width must be > 0".into(),
            ));
        }
        if generation.max_image_height == 0 {
            return Err(ConfigError::ValidationError(
                "generation.max_image_height must be > 0".into(),
            ));
        }
        if generation.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "generation.channel_capacity must be > 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.knowledge.delimiter.is_whitespace() {
            return Err(ConfigError::ValidationError(
                "knowledge.delimiter must not be whitespace".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for llamart_core::Error {
    fn from(e: ConfigError) -> Self {
        llamart_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.sequence_length, 2048);
        assert_eq!(config.generation.flush_threshold, 2);
        assert_eq!(config.generation.image_width, 336);
        assert_eq!(config.generation.max_image_height, 4096);
        assert_eq!(config.knowledge.delimiter, ',');
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.generation.sequence_length, config.generation.sequence_length);
        assert_eq!(parsed.prompt.persona, config.prompt.persona);
    }

    #[test]
    fn zero_sequence_length_rejected() {
        let mut config = AppConfig::default();
        config.generation.sequence_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_image_height_rejected() {
        let mut config = AppConfig::default();
        config.generation.max_image_height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.generation.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn whitespace_delimiter_rejected() {
        let mut config = AppConfig::default();
        config.knowledge.delimiter = '\t';
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::read_file(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.generation.image_width, 336);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[model]
model_path = "/models/llava-v1.pte"
tokenizer_path = "/models/tokenizer.bin"

[generation]
flush_threshold = 4

[knowledge]
path = "/data/paintings.csv"
delimiter = ";"
"#,
        )
        .unwrap();

        let config = AppConfig::read_file(&path).unwrap();
        assert_eq!(config.model.model_path, "/models/llava-v1.pte");
        assert_eq!(config.generation.flush_threshold, 4);
        assert_eq!(config.generation.sequence_length, 2048);
        assert_eq!(config.knowledge.delimiter, ';');
        assert_eq!(config.knowledge_path(), PathBuf::from("/data/paintings.csv"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[generation\nsequence_length = ").unwrap();
        let err = AppConfig::read_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_knowledge_path_lives_in_config_dir() {
        let config = AppConfig::default();
        assert!(config.knowledge_path().ends_with(".llamart/knowledge.csv"));
    }

    #[test]
    fn model_selection_requires_chosen_files() {
        let config = AppConfig::default();
        let err = config.model_selection().unwrap_err();
        assert!(matches!(err, SelectionError::NoFileChosen("model")));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("sequence_length = 2048"));
        assert!(toml_str.contains("Orangerie"));
    }

    #[test]
    fn config_error_maps_to_domain_error() {
        let err: llamart_core::Error = ConfigError::ValidationError("bad".into()).into();
        assert_eq!(err.category(), llamart_core::ErrorCategory::Config);
    }
}
