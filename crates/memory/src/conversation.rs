//! Append-only conversation store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTurn {
    /// Insertion index: starts at 0, strictly increasing, never reused
    pub sequence: u64,

    /// What the user asked
    pub prompt: String,

    /// What the assistant answered (possibly partial if cancelled)
    pub response: String,

    /// When the turn was stored
    pub recorded_at: DateTime<Utc>,
}

impl MemoryTurn {
    fn render(&self) -> String {
        format!("User: {}\nAssistant: {}\n", self.prompt, self.response)
    }
}

#[derive(Debug, Default)]
struct Turns {
    turns: Vec<MemoryTurn>,
    next_sequence: u64,
}

/// Ordered store of conversation turns.
///
/// `append` is the only mutator. There is no removal, no clear and no
/// size bound; turns live as long as the session.
pub struct ConversationMemory {
    inner: RwLock<Turns>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Turns::default()),
        }
    }

    /// Store a turn and return its sequence number.
    pub async fn append(&self, prompt: impl Into<String>, response: impl Into<String>) -> u64 {
        let mut inner = self.inner.write().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.turns.push(MemoryTurn {
            sequence,
            prompt: prompt.into(),
            response: response.into(),
            recorded_at: Utc::now(),
        });
        debug!(sequence, total = inner.turns.len(), "Turn remembered");
        sequence
    }

    /// Render every turn, oldest first, separated by a blank line.
    pub async fn transcript(&self) -> String {
        render_transcript(&self.inner.read().await.turns)
    }

    /// Snapshot of all turns in sequence order.
    pub async fn turns(&self) -> Vec<MemoryTurn> {
        let mut turns = self.inner.read().await.turns.clone();
        turns.sort_by_key(|t| t.sequence);
        turns
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.turns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.turns.is_empty()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Render turns as `User: …\nAssistant: …\n` blocks joined by `\n`.
///
/// Turns are ordered by sequence; for a store built by `append` that is
/// already insertion order.
pub fn render_transcript(turns: &[MemoryTurn]) -> String {
    let mut ordered: Vec<&MemoryTurn> = turns.iter().collect();
    ordered.sort_by_key(|t| t.sequence);
    ordered
        .into_iter()
        .map(MemoryTurn::render)
        .collect::<Vec<_>>()
        .join("\n")
}
