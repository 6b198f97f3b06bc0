//! The single normalized event enum emitted by the core (§6), and the
//! per-provider event types driver tasks feed into it.

use crate::model::ToolCall;

/// Events emitted by an STT session (C4).
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A partial (non-final, subject to revision) transcript.
    Partial {
        /// Transcript text so far.
        text: String,
    },
    /// A final transcript for the current utterance segment.
    Final {
        /// Final transcript text.
        text: String,
        /// Provider confidence, in `[0, 1]`.
        confidence: f32,
    },
    /// The upstream session reported an error.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// The upstream session ended (no more events will follow).
    Ended,
}

/// Events emitted by an LLM provider stream (C5), adapted directly from the
/// normalized streaming event model used elsewhere in this codebase's
/// lineage: one variant per wire-agnostic signal a streaming completion API
/// can emit.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// The stream has started.
    StreamStart,
    /// A raw token/text delta.
    TextDelta {
        /// The delta text.
        text: String,
    },
    /// Reasoning/thinking trace started (kept for providers that emit one;
    /// nothing in this crate's scope forbids it).
    ThinkingStart,
    /// Reasoning/thinking delta.
    ThinkingDelta {
        /// The delta text.
        text: String,
    },
    /// Reasoning/thinking trace ended.
    ThinkingEnd,
    /// A tool call has started; further argument deltas will follow.
    ToolCallStart {
        /// Correlation id for this call.
        call_id: String,
        /// The function name being invoked.
        function_name: String,
    },
    /// Incremental JSON argument text for an in-progress tool call.
    ToolCallArgsDelta {
        /// Correlation id matching a prior `ToolCallStart`.
        call_id: String,
        /// The argument text delta.
        text: String,
    },
    /// A tool call's arguments are complete.
    ToolCallEnd {
        /// Correlation id matching a prior `ToolCallStart`.
        call_id: String,
    },
    /// The stream completed successfully.
    StreamEnd {
        /// Token usage, if the provider reports it.
        usage: Option<TokenUsage>,
    },
    /// The stream failed.
    StreamError {
        /// Human-readable description.
        message: String,
    },
}

/// Token accounting reported by an LLM provider on stream completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Tokens in the request.
    pub prompt_tokens: u32,
    /// Tokens in the response.
    pub completion_tokens: u32,
    /// Total tokens billed.
    pub total_tokens: u32,
    /// Tokens served from a provider-side prompt cache, if reported.
    pub cached_content_tokens: Option<u32>,
}

/// Events emitted by a TTS session (C6).
#[derive(Debug, Clone)]
pub enum TtsEvent {
    /// A chunk of synthesized audio.
    AudioChunk {
        /// Raw PCM (or provider-native) bytes.
        bytes: Vec<u8>,
    },
    /// Synthesis for the current session is complete.
    Complete,
    /// The upstream session reported an error.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// The single normalized event enum all driver tasks feed into the
/// orchestrator's event queue, and that downstream subscribers observe.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A non-final STT transcript arrived.
    SttPartial {
        /// Transcript text so far.
        text: String,
    },
    /// A final STT transcript was accepted and handed to the orchestrator.
    SttFinal {
        /// Final transcript text.
        text: String,
    },
    /// A raw LLM token arrived.
    LlmToken {
        /// The token/delta text.
        text: String,
    },
    /// A complete sentence boundary was detected in the LLM stream.
    LlmSentence {
        /// The sentence text.
        text: String,
    },
    /// The LLM requested a tool call.
    LlmToolCall {
        /// The tool call descriptor.
        call: ToolCall,
    },
    /// A chunk of synthesized reply audio is ready for the transport.
    TtsAudioChunk {
        /// WAV-framed (or provider-native) audio bytes.
        bytes: Vec<u8>,
    },
    /// The first byte of synthesized audio for this turn was emitted.
    FirstAudioByte {
        /// Milliseconds since turn start.
        latency_ms: u64,
    },
    /// A turn completed (successfully or not).
    TurnComplete {
        /// Milliseconds to the first LLM token, if one arrived.
        first_llm_token_ms: Option<u64>,
        /// Milliseconds to the first TTS audio byte, if one arrived.
        first_tts_byte_ms: Option<u64>,
        /// Total turn duration, milliseconds.
        turn_duration_ms: u64,
    },
    /// The user interrupted the agent; downstream work was aborted.
    BargeIn,
    /// The `end_call` tool was invoked; the session should wind down.
    SessionEndRequested {
        /// Reason supplied by the tool call, if any.
        reason: Option<String>,
    },
    /// A recoverable error occurred; the current turn is marked failed.
    Error {
        /// Human-readable description.
        message: String,
    },
}
