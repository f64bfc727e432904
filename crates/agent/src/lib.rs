//! The conversational inference core of Llamart.
//!
//! One user turn goes through:
//!
//! 1. **Retrieve** knowledge entries whose titles occur in the turn or the transcript
//! 2. **Assemble** the prompt (persona, documents, history, user text)
//! 3. **Prepare** the attached image when the multimodal model is selected
//! 4. **Generate** on a background thread, streaming batched deltas back
//! 5. **Remember** the turn once generation completes or is cancelled
//!
//! [`GenerationSession`] drives the whole sequence; the other modules are
//! usable on their own.

pub mod preprocess;
pub mod prompt;
pub mod session;
pub mod stream_event;

pub use preprocess::{DEFAULT_TARGET_WIDTH, ImagePreprocessor};
pub use prompt::PromptAssembler;
pub use session::{
    GenerationHandle, GenerationOutcome, GenerationRequest, GenerationSession, SelectionOutcome,
    SessionConfig, SessionError, SessionState,
};
pub use stream_event::SessionEvent;
