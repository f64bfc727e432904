//! Conversation memory for Llamart.
//!
//! Holds the (prompt, response) turns of the current session and renders
//! them into the transcript that is fed back into every prompt.

pub mod conversation;

pub use conversation::{ConversationMemory, MemoryTurn, render_transcript};
