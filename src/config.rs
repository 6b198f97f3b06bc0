//! Runtime configuration for the voice-conversation core pipeline.
//!
//! Every sub-config derives `Serialize`/`Deserialize` with `#[serde(default)]`
//! so a host can load a partial JSON/TOML document and get sane defaults for
//! whatever it omits.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a single [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Inbound/outbound PCM framing.
    pub audio: AudioConfig,
    /// Transcript acceptance thresholds (C2).
    pub validator: ValidatorConfig,
    /// Adaptive silence debounce tuning (C3).
    pub turn: TurnConfig,
    /// STT provider session parameters (C4).
    pub stt: SttConfig,
    /// LLM provider session parameters (C5).
    pub llm: LlmConfig,
    /// TTS provider session parameters (C6).
    pub tts: TtsConfig,
    /// Filler playback tuning (C7).
    pub filler: FillerConfig,
    /// Barge-in detection tuning (C8).
    pub barge_in: BargeInConfig,
    /// Tool invocation tuning (C9).
    pub tool: ToolConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            validator: ValidatorConfig::default(),
            turn: TurnConfig::default(),
            stt: SttConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            filler: FillerConfig::default(),
            barge_in: BargeInConfig::default(),
            tool: ToolConfig::default(),
        }
    }
}

/// Inbound/outbound PCM framing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate (Hz) of inbound caller PCM frames, also the rate the STT
    /// session is opened at.
    pub input_sample_rate: u32,
    /// Sample rate (Hz) negotiated with the TTS provider for outbound audio.
    pub output_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 44_100,
        }
    }
}

/// Transcript validator thresholds (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum trimmed length (characters) accepted unconditionally, absent
    /// a short-phrase allow-list match.
    pub min_length: usize,
    /// Minimum confidence accepted regardless of length.
    pub min_confidence: f32,
    /// Trimmed-length floor considered "long enough to skip the confidence
    /// check" (rule 1).
    pub long_enough_length: usize,
    /// Tightened minimum length while TTS is playing (echo suppression,
    /// rule 5).
    pub echo_suppression_min_length: usize,
    /// Length below which "semantic completeness" (rule 6) is required.
    pub semantic_completeness_threshold: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_length: 4,
            min_confidence: 0.5,
            long_enough_length: 20,
            echo_suppression_min_length: 10,
            semantic_completeness_threshold: 15,
        }
    }
}

/// Adaptive silence debounce tuning (C3, `silenceWait`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Base wait, `B`, in milliseconds.
    pub base_wait_ms: u64,
    /// Max wait, `M`, in milliseconds, used for mid-thought and very-short
    /// classifications.
    pub max_wait_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            base_wait_ms: 450,
            max_wait_ms: 900,
        }
    }
}

/// STT provider session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// BCP-47-ish language tag passed to `SttProvider::open`.
    pub language: String,
    /// Sample rate (Hz) the upstream STT session expects.
    pub sample_rate: u32,
    /// Maximum seconds of audio buffered while the session is not yet ready;
    /// beyond this the driver drops the oldest queued frame.
    pub max_queue_seconds: f32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_owned(),
            sample_rate: 16_000,
            max_queue_seconds: 2.0,
        }
    }
}

/// Behaviour when user messages arrive while a tool is executing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuedInputPolicy {
    /// Discard queued input once the tool completes (this crate's default;
    /// see `spec.md` §4.9 step 6: "discard any queued-during-tool user
    /// input").
    #[default]
    Discard,
}

/// Language model provider session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// System prompt sent with every stream request.
    pub system_prompt: String,
    /// Sampling temperature, if the provider honors it.
    pub temperature: f32,
    /// Maximum tokens requested per completion.
    pub max_tokens: u32,
    /// Maximum number of prior messages kept in the conversation log sent
    /// upstream (oldest trimmed first, system prompt excluded from the
    /// count).
    pub max_history_messages: usize,
    /// What to do with user input that arrives while `executingTool = true`.
    pub queued_input_policy: QueuedInputPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: 1024,
            max_history_messages: 64,
            queued_input_policy: QueuedInputPolicy::default(),
        }
    }
}

/// Text-to-speech provider session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Default voice identifier passed to `TtsProvider::open_stream`.
    pub voice: String,
    /// Default language tag; overridden per-sentence by the orchestrator's
    /// script-ratio language detection (§4.9).
    pub language: String,
    /// Sample rate (Hz) of raw-PCM audio returned by the provider.
    pub sample_rate: u32,
    /// Minimum bytes of raw-PCM audio accumulated before emitting an
    /// outbound chunk with a freshly prepended WAV header (default: ~90ms
    /// at 44.1kHz/16-bit mono).
    pub min_chunk_bytes: usize,
    /// Timeout, in seconds, for `TtsSession::end()` to observe the
    /// upstream's done event.
    pub end_timeout_s: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: "default".to_owned(),
            language: "en-US".to_owned(),
            sample_rate: 44_100,
            min_chunk_bytes: 8 * 1024,
            end_timeout_s: 15,
        }
    }
}

/// Filler playback tuning (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FillerConfig {
    /// Whether the filler cache is populated and consulted at all. When
    /// false, only the one-shot synthesis fallback is attempted.
    pub cache_enabled: bool,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
        }
    }
}

/// Barge-in controller tuning (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// RMS threshold above which an inbound frame counts as "loud" while
    /// `ttsActive`.
    pub rms_threshold: f64,
    /// Number of consecutive loud frames required to confirm a barge-in.
    pub required_consecutive_frames: u32,
    /// How long, in milliseconds, `ttsActive` stays true after the upstream
    /// TTS session reports done, to account for client-side playback
    /// buffering.
    pub estimated_playback_tail_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 600.0,
            required_consecutive_frames: 2,
            estimated_playback_tail_ms: 500,
        }
    }
}

/// Tool invocation tuning (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Default per-tool execution timeout, in seconds.
    pub default_timeout_s: u64,
    /// Grace period, in milliseconds, between an `end_call` tool result and
    /// `Pipeline::stop`, to let residual audio flush.
    pub end_call_grace_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 30,
            end_call_grace_ms: 500,
        }
    }
}
