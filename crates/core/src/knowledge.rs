//! Knowledge entries: the unit of retrieval.

use serde::{Deserialize, Serialize};

/// A titled reference snippet. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub title: String,
    pub description: String,
}

impl KnowledgeEntry {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// Render as it appears inside the prompt's documents block.
    pub fn render(&self) -> String {
        format!("Title: {}\nDescription: {}", self.title, self.description)
    }
}
