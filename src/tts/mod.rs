//! Text-to-Speech Stream Driver (C6): session lifecycle, queue-before-ready
//! buffering, the never-`end`-with-no-text protocol guard, and raw-PCM
//! chunk accumulation with per-chunk WAV framing.
//!
//! Grounded on the same `SttStreamDriver` shape (C4), itself grounded on the
//! teacher's `ProviderAdapter` event-stream split.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TtsConfig;
use crate::error::{CoreError, Result};
use crate::events::TtsEvent;

/// One upstream TTS session, opened for the lifetime of a turn (or longer,
/// depending on the provider).
#[async_trait]
pub trait TtsSession: Send {
    /// Queue a sentence of text for synthesis.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Signal "no more text"; must only be called after at least one
    /// successful `send_text` (`spec.md` §4.6, §7).
    async fn end(&mut self) -> Result<()>;

    /// Cancel the session immediately, discarding in-flight audio.
    async fn abort(&mut self);
}

/// Audio returned by a one-shot, non-streaming synthesis call.
#[derive(Debug, Clone)]
pub struct OneShotAudio {
    /// Raw PCM samples, or provider-native encoded bytes per `audio_format`.
    pub audio_content: Vec<u8>,
    /// A short tag describing the encoding (e.g. `"pcm16"`, `"mulaw"`).
    pub audio_format: String,
    /// Duration of the synthesized audio, milliseconds.
    pub duration_ms: u32,
}

/// Opens [`TtsSession`]s and performs one-shot synthesis against a concrete
/// upstream provider.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Open a streaming session for the given voice and language. Events are
    /// delivered on `events` for the lifetime of the returned session.
    async fn open_stream(
        &self,
        voice: &str,
        language: &str,
        events: mpsc::UnboundedSender<TtsEvent>,
    ) -> Result<Box<dyn TtsSession>>;

    /// Synthesize a complete utterance in one call, used by the Filler
    /// Player (C7) for its fallback path.
    async fn synthesize(&self, text: &str, voice: &str, language: &str) -> Result<OneShotAudio>;

    /// Whether this provider emits raw PCM (needing per-chunk WAV framing)
    /// or an already-framed/telephony format (mu-law etc., passed through
    /// unmodified).
    fn emits_raw_pcm(&self) -> bool;
}

/// Wraps a [`Box<dyn TtsSession>`] with queue-before-ready buffering, the
/// never-`end`-with-no-text guard, and raw-PCM chunk accumulation (§4.6).
pub struct TtsStreamDriver {
    session: Box<dyn TtsSession>,
    ready: bool,
    queue: VecDeque<String>,
    text_ever_sent: bool,
    sample_rate: u32,
    raw_pcm: bool,
    min_chunk_bytes: usize,
    pcm_accumulator: Vec<u8>,
    end_timeout: Duration,
}

impl TtsStreamDriver {
    /// Wrap a freshly opened session.
    pub fn new(session: Box<dyn TtsSession>, config: &TtsConfig, raw_pcm: bool) -> Self {
        Self {
            session,
            ready: false,
            queue: VecDeque::new(),
            text_ever_sent: false,
            sample_rate: config.sample_rate,
            raw_pcm,
            min_chunk_bytes: config.min_chunk_bytes,
            pcm_accumulator: Vec::new(),
            end_timeout: Duration::from_secs(config.end_timeout_s),
        }
    }

    /// The configured timeout for [`end`](Self::end) to observe the
    /// upstream's done event.
    pub fn end_timeout(&self) -> Duration {
        self.end_timeout
    }

    /// Mark the upstream session ready, flushing any queued sentences in
    /// order.
    pub async fn mark_ready(&mut self) -> Result<()> {
        self.ready = true;
        while let Some(text) = self.queue.pop_front() {
            self.session.send_text(&text).await?;
            self.text_ever_sent = true;
        }
        Ok(())
    }

    /// Queue (or immediately forward) a sentence.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.ready {
            self.session.send_text(text).await?;
            self.text_ever_sent = true;
        } else {
            self.queue.push_back(text.to_owned());
        }
        Ok(())
    }

    /// Signal end-of-input. A no-op (not an error) when nothing was ever
    /// sent — callers must still check [`Self::has_sent_text`] before
    /// deciding to call `end` at all, per §4.6; this method enforces it as
    /// a defense-in-depth assertion (`CoreError::Protocol`).
    pub async fn end(&mut self) -> Result<()> {
        if !self.text_ever_sent {
            return Err(CoreError::Protocol(
                "TTS end() called with no text ever sent".to_owned(),
            ));
        }
        self.session.end().await
    }

    /// Whether any text has been sent this session (the caller's guard for
    /// whether `end` is legal to call at all — see §4.9 step: "`end` iff
    /// text was sent").
    pub fn has_sent_text(&self) -> bool {
        self.text_ever_sent
    }

    /// Abort immediately, discarding any queued sentences.
    pub async fn abort(&mut self) {
        self.queue.clear();
        self.pcm_accumulator.clear();
        self.session.abort().await;
    }

    /// Feed one upstream audio chunk, returning zero or more outbound
    /// chunks ready for the transport. For raw-PCM providers, bytes are
    /// accumulated until at least `min_chunk_bytes` before a WAV header is
    /// prepended and the chunk emitted; mu-law/telephony chunks pass
    /// through unmodified.
    pub fn accept_audio_chunk(&mut self, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        if !self.raw_pcm {
            return vec![bytes];
        }
        self.pcm_accumulator.extend_from_slice(&bytes);
        if self.pcm_accumulator.len() < self.min_chunk_bytes {
            return Vec::new();
        }
        let pending = std::mem::take(&mut self.pcm_accumulator);
        vec![wrap_pcm_bytes(&pending, self.sample_rate)]
    }

    /// Flush any residual accumulated PCM as a final framed chunk (call on
    /// `TtsEvent::Complete` for raw-PCM providers).
    pub fn flush_residual(&mut self) -> Option<Vec<u8>> {
        if !self.raw_pcm || self.pcm_accumulator.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pcm_accumulator);
        Some(wrap_pcm_bytes(&pending, self.sample_rate))
    }
}

fn wrap_pcm_bytes(bytes: &[u8], sample_rate: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(44 + bytes.len());
    buf.extend_from_slice(&crate::audio::wav_header(bytes.len() as u32, sample_rate));
    buf.extend_from_slice(bytes);
    buf
}
