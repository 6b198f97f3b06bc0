//! Session store contract (§6): the external collaborator a [`crate::pipeline::Pipeline`]
//! reads its provider configuration from and writes its conversation log and
//! metrics back into.
//!
//! Session persistence, billing, and tenant configuration storage are out of
//! scope for this crate (`spec.md` §1); a host implements [`SessionStore`]
//! against its own database/cache and hands the `Pipeline` a trait object.

use serde_json::Value;

use crate::model::ConversationLog;

/// Per-call provider configuration read from the session at pipeline start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// STT language tag (e.g. `"en-US"`).
    pub stt_language: String,
    /// TTS voice identifier.
    pub tts_voice: String,
    /// System prompt passed to the LLM driver.
    pub llm_system_prompt: String,
    /// Opaque call context forwarded verbatim to tool invocations (auth,
    /// tenant id, caller phone number, ...).
    pub call_context: Value,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stt_language: "en-US".to_owned(),
            tts_voice: "default".to_owned(),
            llm_system_prompt: String::new(),
            call_context: Value::Null,
        }
    }
}

/// A host-supplied handle to one call session's persisted state.
///
/// The core reads `{sttConfig.language, ttsConfig.voice,
/// llmConfig.systemPrompt, messages, context, metrics}` from, and writes the
/// log and metrics back into, a caller-provided session handle (`spec.md`
/// §6). `messages`/`metrics` are written back only at the points this
/// contract names: turn completion and barge-in truncation.
pub trait SessionStore: Send + Sync {
    /// A stable identifier for this session, forwarded to tool invocations.
    fn session_id(&self) -> &str;

    /// Load the provider configuration and call context for this session.
    fn config(&self) -> SessionConfig;

    /// Persist the conversation log after a turn completes or is truncated
    /// by barge-in. Called with the full log, not a delta — the only two
    /// mutation points (append, single truncation) make a full overwrite
    /// cheap to reason about for a host's storage layer.
    fn persist_log(&self, log: &ConversationLog);

    /// Persist one turn's metrics (rolling counters, e.g. `turnCount`).
    fn persist_turn_metrics(&self, metrics: &crate::metrics::TurnMetrics);
}

/// An in-memory [`SessionStore`] backed by a mutex, useful for tests and
/// hosts that don't need cross-process persistence.
pub struct InMemorySessionStore {
    session_id: String,
    config: SessionConfig,
    log: std::sync::Mutex<ConversationLog>,
    last_metrics: std::sync::Mutex<Option<crate::metrics::TurnMetrics>>,
}

impl InMemorySessionStore {
    /// Build a store with the given session id and initial provider config.
    pub fn new(session_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            log: std::sync::Mutex::new(ConversationLog::new()),
            last_metrics: std::sync::Mutex::new(None),
        }
    }

    /// A snapshot of the persisted log.
    pub fn log_snapshot(&self) -> ConversationLog {
        self.log.lock().expect("log mutex").clone()
    }

    /// The most recently persisted turn metrics, if any.
    pub fn last_metrics(&self) -> Option<crate::metrics::TurnMetrics> {
        self.last_metrics.lock().expect("metrics mutex").clone()
    }
}

impl SessionStore for InMemorySessionStore {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn config(&self) -> SessionConfig {
        self.config.clone()
    }

    fn persist_log(&self, log: &ConversationLog) {
        *self.log.lock().expect("log mutex") = log.clone();
    }

    fn persist_turn_metrics(&self, metrics: &crate::metrics::TurnMetrics) {
        *self.last_metrics.lock().expect("metrics mutex") = Some(metrics.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    #[test]
    fn in_memory_store_round_trips_log() {
        let store = InMemorySessionStore::new("sess-1", SessionConfig::default());
        let mut log = ConversationLog::new();
        log.push(Message::user("hi"));
        store.persist_log(&log);
        assert_eq!(store.log_snapshot().messages().len(), 1);
    }

    #[test]
    fn in_memory_store_tracks_latest_metrics() {
        let store = InMemorySessionStore::new("sess-1", SessionConfig::default());
        assert!(store.last_metrics().is_none());
        store.persist_turn_metrics(&crate::metrics::TurnMetrics {
            turn_duration_ms: 120,
            ..Default::default()
        });
        assert_eq!(store.last_metrics().expect("metrics").turn_duration_ms, 120);
    }
}
