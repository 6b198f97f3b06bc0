//! Error types for the voice-conversation core pipeline.

/// Top-level error type for the core pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Transient upstream STT failure (network blip, session reset, timeout).
    #[error("STT error: {0}")]
    Stt(String),

    /// Transient upstream LLM failure.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Transient upstream TTS failure.
    #[error("TTS error: {0}")]
    Tts(String),

    /// A tool invocation failed or timed out.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable failure description.
        message: String,
    },

    /// Provider configuration invalid (missing credentials, unknown provider
    /// type). Fatal at startup; the pipeline cannot `start`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A protocol invariant the driver is supposed to prevent by construction
    /// was violated anyway (e.g. TTS `end` with no text ever sent). Kept for
    /// defense-in-depth assertions; should never surface in production.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Internal channel send/receive failure (a driver task died, or a
    /// receiver was dropped early).
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoreError>;
