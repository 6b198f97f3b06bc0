//! Core data model: conversation log, turns, transcript fragments, and
//! audio frames.
//!
//! # Examples
//!
//! ```
//! use callcore::model::{ConversationLog, Message};
//!
//! let mut log = ConversationLog::new();
//! log.push(Message::user("What's my balance?"));
//! assert_eq!(log.messages().len(), 1);
//! ```

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions. Never appended by the core; passed to the LLM
    /// driver separately as the configured system prompt.
    System,
    /// User input.
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// The content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Tool execution result, correlated back to the tool call that
    /// produced it.
    ToolResult {
        /// The tool call ID this result corresponds to.
        call_id: String,
        /// The tool's output content, JSON-encoded.
        content: String,
    },
}

/// A pending tool call attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call, used to correlate the eventual
    /// tool-result message.
    pub call_id: String,
    /// The function name being invoked.
    pub function_name: String,
    /// JSON-encoded argument string.
    pub arguments: String,
}

/// A message in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message.
    pub role: Role,
    /// The message content.
    pub content: MessageContent,
    /// Tool calls attached to this message (only ever non-empty for
    /// `Role::Assistant`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    /// Build a plain-text message with the given role.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
            tool_calls: Vec::new(),
        }
    }

    /// Build a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Build an assistant message, optionally carrying tool calls.
    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text { text: text.into() },
            tool_calls,
        }
    }

    /// Build a tool-result message.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                call_id: call_id.into(),
                content: content.into(),
            },
            tool_calls: Vec::new(),
        }
    }

    /// The plain-text content, if this message carries `Text` content.
    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            MessageContent::ToolResult { .. } => None,
        }
    }
}

/// An ordered sequence of messages, enforcing `spec.md` §3's two invariants
/// as methods rather than caller convention:
///
/// - Tool messages always follow the assistant message whose tool calls
///   they satisfy, in correlation-id order.
/// - Assistant content may be rewritten exactly once, by barge-in
///   truncation (see [`crate::history::truncate_on_barge_in`]); no other
///   mutation after append.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. The only supported mutation path besides
    /// [`Self::rewrite_last_assistant`].
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in append order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Scan backwards for the last assistant message with non-empty
    /// content, and overwrite its content in place. This is the sole
    /// legal post-append mutation (barge-in truncation, §4.11).
    ///
    /// Returns `true` if a message was rewritten.
    pub fn rewrite_last_assistant(&mut self, new_text: impl Into<String>) -> bool {
        for message in self.messages.iter_mut().rev() {
            if message.role != Role::Assistant {
                continue;
            }
            let is_non_empty = matches!(
                &message.content,
                MessageContent::Text { text } if !text.is_empty()
            );
            if !is_non_empty {
                continue;
            }
            message.content = MessageContent::Text {
                text: new_text.into(),
            };
            return true;
        }
        false
    }
}

/// Terminal status of a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStatus {
    /// The agent finished speaking without interruption.
    Completed,
    /// Barge-in or explicit stop cut the turn short.
    Interrupted,
    /// An upstream failure ended the turn early.
    Failed,
}

/// One unit of work from a user utterance to the end of the resulting
/// agent audio.
#[derive(Debug, Clone)]
pub struct Turn {
    /// When the turn started (Turn Arbiter handoff).
    pub start: Instant,
    /// Accumulated user text that triggered this turn.
    pub user_text: String,
    /// Timestamp of the first LLM token, once observed.
    pub first_llm_token: Option<Instant>,
    /// Timestamp of the first TTS audio byte, once observed.
    pub first_tts_byte: Option<Instant>,
    /// Sentences handed to the TTS driver, in order.
    pub sentences: Vec<String>,
    /// Sentences whose TTS playback is believed complete, in order.
    pub played_sentences: Vec<String>,
    /// Number of tool calls made during this turn.
    pub tool_call_count: u32,
    /// Terminal status, set when the turn ends.
    pub status: Option<TurnStatus>,
}

impl Turn {
    /// Start a new turn for the given accumulated user text.
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            user_text: user_text.into(),
            first_llm_token: None,
            first_tts_byte: None,
            sentences: Vec::new(),
            played_sentences: Vec::new(),
            tool_call_count: 0,
            status: None,
        }
    }

    /// Milliseconds from turn start to first LLM token, if observed.
    pub fn first_token_ms(&self) -> Option<u64> {
        self.first_llm_token
            .map(|t| t.duration_since(self.start).as_millis() as u64)
    }

    /// Milliseconds from turn start to first TTS audio byte, if observed.
    pub fn first_byte_ms(&self) -> Option<u64> {
        self.first_tts_byte
            .map(|t| t.duration_since(self.start).as_millis() as u64)
    }
}

/// A single word's timing within a transcript fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    /// The word text.
    pub word: String,
    /// Start offset, milliseconds from the start of the utterance.
    pub start_ms: u32,
    /// End offset, milliseconds from the start of the utterance.
    pub end_ms: u32,
}

/// A transcript fragment from the STT provider.
#[derive(Debug, Clone)]
pub struct TranscriptFragment {
    /// The transcribed text.
    pub text: String,
    /// Whether this is a final result (vs. a partial, subject to revision).
    pub is_final: bool,
    /// Provider confidence, in `[0, 1]`.
    pub confidence: f32,
    /// Optional per-word timing, if the provider supplies it.
    pub words: Option<Vec<WordTiming>>,
    /// When this fragment arrived at the core.
    pub arrived_at: Instant,
}

/// Inbound caller audio: little-endian signed 16-bit PCM, mono.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples.
    pub samples: Vec<i16>,
    /// Sample rate, Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Wrap samples captured at the given rate.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Root-mean-square energy of this frame (C1). See
    /// [`crate::audio::rms_i16`].
    pub fn rms(&self) -> f64 {
        crate::audio::rms_i16(&self.samples)
    }
}

/// Outbound synthesized audio, at the TTS-negotiated rate.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Raw PCM samples (or provider-native bytes, depending on format).
    pub samples: Vec<i16>,
    /// Sample rate, Hz.
    pub sample_rate: u32,
    /// Whether this chunk is the last one for its sentence.
    pub is_final: bool,
}

/// Tracks which sentences of the agent's current reply the client has
/// (believed to have) actually heard, for barge-in truncation.
#[derive(Debug, Clone, Default)]
pub struct TtsPlaybackTracker {
    /// True from the first audio byte of the current turn until the
    /// estimated client playback end.
    pub active: bool,
    /// Estimated wall-clock instant the client finishes draining its
    /// playback buffer, once the upstream TTS session reports done.
    pub playback_end: Option<Instant>,
    /// Sentences handed to TTS, in order.
    pub sentence_queue: Vec<String>,
    /// Number of leading sentences in `sentence_queue` whose TTS
    /// `complete` event has fired.
    pub played_prefix_count: usize,
}

impl TtsPlaybackTracker {
    /// The portion of the queued sentences believed to have reached the
    /// user, joined with spaces (§4.11's `playedPrefix`).
    pub fn played_prefix(&self) -> String {
        self.sentence_queue[..self.played_prefix_count.min(self.sentence_queue.len())].join(" ")
    }

    /// Reset to the empty, inactive state (used by both the barge-in path
    /// and the explicit stop path; see `DESIGN.md`).
    pub fn reset(&mut self) {
        self.active = false;
        self.playback_end = None;
        self.sentence_queue.clear();
        self.played_prefix_count = 0;
    }
}
