//! Knowledge base for Llamart.
//!
//! A flat, read-only list of titled snippets loaded once at startup from a
//! line-oriented text source. Retrieval is deterministic literal substring
//! containment: an entry is relevant iff its title appears in the query.

pub mod parser;

pub use parser::parse_entries;

use llamart_core::error::KnowledgeLoadError;
use llamart_core::knowledge::KnowledgeEntry;
use std::path::Path;
use tracing::{debug, info, warn};

/// The default field delimiter of the knowledge source.
pub const DEFAULT_DELIMITER: char = ',';

/// An immutable, ordered collection of knowledge entries.
///
/// Safe to share behind an `Arc` and read concurrently.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    /// An empty knowledge base; retrieval always returns nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from already-parsed entries. Entries with an empty title are
    /// dropped since they would match every query.
    pub fn from_entries(entries: impl IntoIterator<Item = KnowledgeEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .filter(|e| !e.title.is_empty())
                .collect(),
        }
    }

    /// Parse knowledge from in-memory text.
    pub fn parse(content: &str, delimiter: char) -> Self {
        Self::from_entries(parse_entries(content, delimiter))
    }

    /// Load knowledge from a file.
    pub fn load(path: &Path, delimiter: char) -> Result<Self, KnowledgeLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| KnowledgeLoadError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let base = Self::parse(&content, delimiter);
        info!(path = %path.display(), entries = base.len(), "Knowledge base loaded");
        Ok(base)
    }

    /// Load knowledge from a file, degrading to an empty base on failure.
    ///
    /// The error is handed back so the caller can notify the user; retrieval
    /// then behaves as if no knowledge exists.
    pub fn load_or_empty(path: &Path, delimiter: char) -> (Self, Option<KnowledgeLoadError>) {
        match Self::load(path, delimiter) {
            Ok(base) => (base, None),
            Err(e) => {
                warn!(error = %e, "Knowledge base unavailable, continuing without it");
                (Self::empty(), Some(e))
            }
        }
    }

    /// Every entry whose title occurs in `query`, in load order.
    ///
    /// Matching is case-sensitive and literal: no normalization, no
    /// tokenization, no ranking.
    pub fn retrieve(&self, query: &str) -> Vec<KnowledgeEntry> {
        if query.is_empty() {
            return Vec::new();
        }
        let hits: Vec<KnowledgeEntry> = self
            .entries
            .iter()
            .filter(|e| !e.title.is_empty() && query.contains(e.title.as_str()))
            .cloned()
            .collect();
        debug!(hits = hits.len(), "Knowledge retrieval");
        hits
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render entries for the prompt, separated by a blank line.
pub fn render_documents(entries: &[KnowledgeEntry]) -> String {
    entries
        .iter()
        .map(KnowledgeEntry::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}
