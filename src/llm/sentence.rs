//! Sentence-boundary detection over an LLM token stream (C5, §4.5).
//!
//! The provider is not required to chunk by sentence (§6); this splitter
//! converts raw [`crate::events::LlmEvent::TextDelta`] tokens into
//! `llm_sentence` boundaries for the TTS driver.

use std::sync::LazyLock;

use regex::Regex;

static SENTENCE_BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[.!?।॥]\s*$|:\s*\n$)").expect("sentence boundary regex is valid")
});

/// Accumulates token deltas and emits complete sentences as the regex
/// boundary is crossed.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    /// Start with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token/text delta. Returns `Some(sentence)` the instant the
    /// accumulated buffer ends at a sentence boundary, and resets the
    /// buffer for the next sentence.
    pub fn push_token(&mut self, text: &str) -> Option<String> {
        self.buffer.push_str(text);
        if SENTENCE_BOUNDARY_RE.is_match(&self.buffer) {
            let sentence = std::mem::take(&mut self.buffer);
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                return None;
            }
            return Some(trimmed.to_owned());
        }
        None
    }

    /// Flush any residual buffered text on stream completion (§4.5 "On
    /// `complete`: flush any residual sentence buffer").
    pub fn flush(&mut self) -> Option<String> {
        let residual = std::mem::take(&mut self.buffer);
        let trimmed = residual.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}
