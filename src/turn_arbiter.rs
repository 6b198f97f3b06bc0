//! Turn Arbiter (C3): accumulates STT finals, runs the adaptive silence
//! debounce (`silenceWait`), and decides when a turn has ended.
//!
//! Per `spec.md` §9 ("timers as first-class messages"), this type does not
//! own a `tokio::time::sleep` itself. [`TurnArbiter::on_final`] returns a
//! [`Duration`] plus a [`DebounceToken`]; the owning [`crate::pipeline::Pipeline`]
//! schedules the actual timer and calls [`TurnArbiter::fire`] with the same
//! token when it elapses, so a superseding final simply invalidates the
//! stale token instead of requiring `AbortHandle` bookkeeping here.

use std::time::{Duration, Instant};

use regex::Regex;
use std::sync::LazyLock;

use crate::config::TurnConfig;

/// Opaque handle identifying one scheduled debounce timer. Only the most
/// recently issued token is considered current; [`TurnArbiter::fire`] with a
/// stale token is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceToken(u64);

/// Outcome of a debounce timer firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterOutcome {
    /// The token was stale (a newer final already superseded it), or the
    /// user resumed speaking before the timer fired; nothing to do.
    Superseded,
    /// A turn is already being processed; the accumulated text is dropped
    /// per `spec.md` §4.3 ("If a turn is already being processed, drop").
    DroppedBusy,
    /// Ready for validation: the caller should run
    /// [`crate::validator::validate`] and, on accept, hand `text` to the
    /// Turn Orchestrator.
    ReadyForValidation {
        /// The accumulated user text.
        text: String,
        /// Confidence of the last STT final folded into `text`.
        confidence: f32,
    },
}

/// Accumulates STT partial/final events and classifies silence duration.
pub struct TurnArbiter {
    config: TurnConfig,
    accumulated: String,
    last_confidence: f32,
    is_speaking: bool,
    last_speech_at: Option<Instant>,
    current_token: Option<DebounceToken>,
    next_token: u64,
    processing_turn: bool,
}

impl TurnArbiter {
    /// Build an arbiter with the given debounce tuning.
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            accumulated: String::new(),
            last_confidence: 0.0,
            is_speaking: false,
            last_speech_at: None,
            current_token: None,
            next_token: 0,
            processing_turn: false,
        }
    }

    /// Whether a turn is currently in flight (gates new debounce handoffs).
    pub fn is_processing_turn(&self) -> bool {
        self.processing_turn
    }

    /// Mark that a turn has started being processed (called by the
    /// orchestrator on `Idle -> Processing`).
    pub fn mark_turn_started(&mut self) {
        self.processing_turn = true;
    }

    /// Mark that the in-flight turn has ended (called by the orchestrator
    /// on any return to `Idle`).
    pub fn mark_turn_ended(&mut self) {
        self.processing_turn = false;
    }

    /// On any STT partial: mark speaking, invalidate the pending debounce
    /// timer (by advancing past `current_token`), and update
    /// `last_speech_at`.
    pub fn on_partial(&mut self) {
        self.is_speaking = true;
        self.last_speech_at = Some(Instant::now());
        self.current_token = None;
    }

    /// On STT final: fold the text into `accumulated`, classify the
    /// trailing text, and return the wait duration plus a fresh token for
    /// the caller to schedule a timer with.
    pub fn on_final(&mut self, text: &str, confidence: f32) -> (Duration, DebounceToken) {
        self.is_speaking = false;
        self.last_confidence = confidence;
        if self.accumulated.is_empty() {
            self.accumulated = text.trim().to_owned();
        } else {
            self.accumulated.push(' ');
            self.accumulated.push_str(text.trim());
        }

        let wait = silence_wait(&self.accumulated, &self.config);
        let token = self.issue_token();
        (wait, token)
    }

    /// Called when the scheduled timer for `token` elapses.
    pub fn fire(&mut self, token: DebounceToken) -> ArbiterOutcome {
        if self.current_token != Some(token) {
            return ArbiterOutcome::Superseded;
        }
        if self.is_speaking {
            return ArbiterOutcome::Superseded;
        }
        if self.processing_turn {
            self.accumulated.clear();
            self.current_token = None;
            return ArbiterOutcome::DroppedBusy;
        }

        let text = std::mem::take(&mut self.accumulated);
        self.current_token = None;
        ArbiterOutcome::ReadyForValidation {
            text,
            confidence: self.last_confidence,
        }
    }

    /// The STT session ended while `accumulated` is non-empty: process
    /// immediately with the last-known confidence (§4.3 "Fails").
    pub fn on_session_ended(&mut self) -> Option<(String, f32)> {
        if self.accumulated.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.accumulated);
        self.current_token = None;
        Some((text, self.last_confidence))
    }

    fn issue_token(&mut self) -> DebounceToken {
        self.next_token += 1;
        let token = DebounceToken(self.next_token);
        self.current_token = Some(token);
        token
    }
}

static MID_THOUGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        (
            \b(and|but|or|so|because|although|though|while|if|when|since|
               unless|until|whereas|that|which|who|whom|whose|
               i|you|he|she|it|we|they|my|your|his|her|its|our|their|
               is|am|are|was|were|be|been|being|have|has|had|do|does|did|
               will|would|shall|should|may|might|must|can|could|
               the|a|an|this|that|these|those|
               want|need|think|going|trying|planning|hoping|wondering|
               in|on|at|to|for|with|from|by|of|about|into|over|under
            )\s*$
            |,\s*$
        )",
    )
    .expect("mid-thought regex is valid")
});

const CLOSING_PHRASES: &[&str] = &["thanks", "thank you", "bye", "goodbye", "that's all", "thats all"];

/// The heart of low-latency turn detection (`spec.md` §4.3). Classifies the
/// trailing accumulated text and returns how long to wait for more speech.
pub fn silence_wait(text: &str, config: &TurnConfig) -> Duration {
    let trimmed = text.trim();
    let base = config.base_wait_ms;
    let max = config.max_wait_ms;
    let len = trimmed.chars().count();
    let lower = trimmed.to_lowercase();

    let ends_terminal = trimmed
        .chars()
        .next_back()
        .is_some_and(|c| matches!(c, '.' | '!' | '?' | '।' | '॥'));
    let ends_question = trimmed.ends_with('?');
    let lower_no_term = lower.trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | '।' | '॥'));
    let has_closing_phrase = CLOSING_PHRASES.iter().any(|p| lower_no_term.ends_with(p));

    let ms = if MID_THOUGHT_RE.is_match(trimmed) {
        // mid-thought
        max
    } else if ends_terminal && has_closing_phrase {
        // clear ending
        (base as f64 * 0.5).min(600.0) as u64
    } else if ends_question {
        // question
        (base as f64 * 0.6).min(700.0) as u64
    } else if ends_terminal && len > 20 {
        // punctuated and long
        (base as f64 * 0.75).min(900.0) as u64
    } else if len < 20 && !ends_terminal {
        // very short, unpunctuated
        max
    } else if len < 40 {
        // medium unpunctuated
        base.max(1200)
    } else {
        base
    };

    Duration::from_millis(ms)
}
