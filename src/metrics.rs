//! Metrics Collector (C10): per-stage timing and per-turn summary metrics.
//!
//! The [`MetricsCollector`] trait lets a host plug in Prometheus, StatsD, or
//! any other backend while keeping the core decoupled from a specific
//! metrics system; [`NoopMetrics`] is the zero-cost default.

use std::time::Duration;

use crate::model::Turn;

/// Per-turn latency and volume metrics, emitted on `turn_complete`.
///
/// No aggregation beyond the session scope happens in-core; a host
/// forwards each [`TurnMetrics`] to its own rollups.
#[derive(Debug, Clone, Default)]
pub struct TurnMetrics {
    /// Milliseconds to the first LLM token, if one arrived.
    pub first_llm_token_ms: Option<u64>,
    /// Milliseconds to the first TTS audio byte, if one arrived.
    pub first_tts_byte_ms: Option<u64>,
    /// Total turn duration, milliseconds.
    pub turn_duration_ms: u64,
    /// Number of sentences handed to TTS this turn.
    pub sentence_count: u32,
    /// Number of tool calls made this turn.
    pub tool_call_count: u32,
}

impl TurnMetrics {
    /// Build turn metrics from a completed (or aborted) [`Turn`].
    pub fn from_turn(turn: &Turn, turn_duration: Duration) -> Self {
        Self {
            first_llm_token_ms: turn.first_token_ms(),
            first_tts_byte_ms: turn.first_byte_ms(),
            turn_duration_ms: turn_duration.as_millis() as u64,
            sentence_count: turn.sentences.len() as u32,
            tool_call_count: turn.tool_call_count,
        }
    }
}

/// Pluggable metrics sink for the core pipeline.
///
/// All methods take `&self`, not `&mut self`, so a single collector can be
/// shared across concurrently running pipelines; implementors use interior
/// mutability (atomics, a mutex, or a channel to a background aggregator)
/// as needed.
pub trait MetricsCollector: Send + Sync {
    /// Record the metrics for one completed turn.
    fn record_turn(&self, metrics: &TurnMetrics);

    /// Record time spent in one pipeline stage (`stt`, `llm`, `tts`,
    /// `tool_execution`).
    fn record_stage_latency_ms(&self, stage: &str, latency_ms: u64) {
        let _ = (stage, latency_ms);
    }
}

/// No-op metrics collector; the default when a host doesn't wire one up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_turn(&self, _metrics: &TurnMetrics) {}
}
