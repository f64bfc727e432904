//! Prompt assembly: frames persona, knowledge, history and the user turn.
//!
//! The output uses the Llama 3 chat grammar with its special tokens written
//! out literally:
//!
//! ```text
//! <|begin_of_text|><|start_header_id|>system<|end_header_id|>
//! {system message}<|eot_id|><|start_header_id|>user<|end_header_id|>
//! {user text}<|eot_id|><|start_header_id|>assistant<|end_header_id|>
//! ```
//!
//! # Determinism
//!
//! Assembly is a pure function of its inputs. The backend tokenizes the
//! markers by exact string match, so none of them may be altered.

use llamart_config::PromptConfig;
use llamart_core::backend::BackendKind;
use llamart_core::knowledge::KnowledgeEntry;
use llamart_knowledge::render_documents;

// ── Grammar markers ───────────────────────────────────────────────────────

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
pub const START_HEADER: &str = "<|start_header_id|>";
pub const END_HEADER: &str = "<|end_header_id|>";
pub const END_OF_TURN: &str = "<|eot_id|>";

const DOCUMENTS_INTRO: &str =
    "You have access to the following documents which are meant to provide context as you answer the query:";
const HISTORY_INTRO: &str = "You have access to the conversation history, which is meant to provide even more context as you answer the query:";
const RETRIEVED_HEADING: &str = "User Oriented Information for Paintings:";

// ── Assembler ─────────────────────────────────────────────────────────────

/// Builds backend-ready prompts from a fixed persona and background text.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    persona: String,
    background: String,
}

impl PromptAssembler {
    pub fn new(persona: impl Into<String>, background: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            background: background.into(),
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(config.persona.clone(), config.background.clone())
    }

    /// Compose the full prompt for one user turn.
    pub fn build(&self, user_text: &str, retrieved: &[KnowledgeEntry], transcript: &str) -> String {
        let system = self.system_message(retrieved, transcript);
        format!(
            "{BEGIN_OF_TEXT}{START_HEADER}system{END_HEADER}\n\
             {system}{END_OF_TURN}{START_HEADER}user{END_HEADER}\n\
             {user_text}{END_OF_TURN}{START_HEADER}assistant{END_HEADER}"
        )
    }

    fn system_message(&self, retrieved: &[KnowledgeEntry], transcript: &str) -> String {
        let documents = render_documents(retrieved);
        format!(
            "CONTEXT\n{persona}\n\n\
             DOCUMENTS\n{DOCUMENTS_INTRO}\n<documents>\n{background}\n\n\
             {RETRIEVED_HEADING}\n{documents}\n</documents>\n\n\
             HISTORY\n{HISTORY_INTRO}\n<history>\n{transcript}\n</history>",
            persona = self.persona,
            background = self.background,
        )
    }

    /// The text knowledge retrieval runs against: the current turn followed
    /// by the whole transcript, so earlier mentions stay retrievable.
    pub fn retrieval_query(user_text: &str, transcript: &str) -> String {
        format!("{user_text}{transcript}")
    }

    /// Adapt an assembled prompt to a backend's grammar.
    pub fn for_backend(prompt: &str, kind: BackendKind) -> String {
        format!("{prompt}{}", kind.prompt_suffix())
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}
