//! Per-token delivery policy.
//!
//! Runs on the background thread inside the backend's token callback. Owns
//! the token buffer and the accumulated response for one generation.

use crate::stream_event::SessionEvent;
use llamart_core::backend::{Backend, BackendKind, EndOfSequencePolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// What a finished token stream produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamSummary {
    pub text: String,
    pub tokens: usize,
    /// The backend emitted its end-of-sequence marker.
    pub end_reached: bool,
}

pub(crate) struct TokenStream<'a> {
    kind: BackendKind,
    prompt: &'a str,
    backend: &'a dyn Backend,
    cancel: &'a AtomicBool,
    sink: &'a mpsc::Sender<SessionEvent>,
    flush_threshold: usize,
    buffer: Vec<String>,
    text: String,
    tokens: usize,
    suppressed: bool,
    end_reached: bool,
    cancel_observed: bool,
}

impl<'a> TokenStream<'a> {
    pub fn new(
        kind: BackendKind,
        prompt: &'a str,
        backend: &'a dyn Backend,
        cancel: &'a AtomicBool,
        sink: &'a mpsc::Sender<SessionEvent>,
        flush_threshold: usize,
    ) -> Self {
        Self {
            kind,
            prompt,
            backend,
            cancel,
            sink,
            flush_threshold,
            buffer: Vec::new(),
            text: String::new(),
            tokens: 0,
            suppressed: false,
            end_reached: false,
            cancel_observed: false,
        }
    }

    pub fn on_token(&mut self, token: &str) {
        if self.cancel.load(Ordering::SeqCst) {
            self.backend.stop();
            if !self.cancel_observed {
                self.cancel_observed = true;
                // The caller sees exactly what will be remembered.
                self.flush();
            }
            return;
        }

        // Runners echo the prompt as their first callback.
        if token == self.prompt {
            return;
        }

        if token == self.kind.end_of_sequence() {
            self.end_reached = true;
            match self.kind.end_of_sequence_policy() {
                EndOfSequencePolicy::StopBackend => {
                    self.cancel.store(true, Ordering::SeqCst);
                    self.backend.stop();
                }
                // The text runner over-generates past <|eot_id|>; let it end on its own.
                EndOfSequencePolicy::SuppressDelivery => self.suppressed = true,
            }
            debug!(kind = %self.kind, tokens = self.tokens, "End of sequence");
            return;
        }

        if self.suppressed {
            return;
        }

        let token = match self.kind {
            BackendKind::Text => token.trim_start_matches(['\n', '\r']),
            BackendKind::Multimodal => token,
        };
        self.buffer.push(token.to_string());
        self.text.push_str(token);
        self.tokens += 1;

        if self.buffer.len() > self.flush_threshold {
            self.flush();
        }
    }

    /// Flush whatever is still buffered and hand back the result.
    pub fn finish(mut self) -> StreamSummary {
        self.flush();
        StreamSummary {
            text: self.text,
            tokens: self.tokens,
            end_reached: self.end_reached,
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let event = SessionEvent::Delta {
            content: self.buffer.concat(),
            tokens: self.buffer.len(),
        };
        self.buffer.clear();
        if self.sink.blocking_send(event).is_err() {
            // Nobody is listening any more; wind the backend down.
            debug!("Event receiver dropped, cancelling generation");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }
}
