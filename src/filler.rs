//! Filler Player (C7): plays a short acknowledgement the instant a tool call
//! arrives, before the tool executes, so the user hears something while
//! waiting.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::FillerConfig;
use crate::tts::TtsProvider;

/// Filler category. The only category defined by `spec.md` is
/// `tool_execution` (played before a tool call); the type stays open for a
/// host to register more without changing the player's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillerCategory {
    /// Played the instant an LLM tool-call event arrives, before the tool
    /// executes.
    ToolExecution,
}

/// Plays a cached or synthesized filler buffer. Never returns `Err` —
/// silence-on-failure is encoded as `Ok(None)` (§4.7).
pub struct FillerPlayer {
    config: FillerConfig,
    cache: HashMap<(String, FillerCategory), Vec<i16>>,
    tts: Arc<dyn TtsProvider>,
    voice: String,
}

impl FillerPlayer {
    /// Build a player with a pre-populated cache and a handle to the TTS
    /// provider for the one-shot fallback.
    pub fn new(
        config: FillerConfig,
        cache: HashMap<(String, FillerCategory), Vec<i16>>,
        tts: Arc<dyn TtsProvider>,
        voice: String,
    ) -> Self {
        Self {
            config,
            cache,
            tts,
            voice,
        }
    }

    /// Choose a filler for the given language and category, in preference
    /// order: cache, one-shot synthesis, silence. Returns WAV-framed bytes
    /// ready for the transport.
    pub async fn play(&self, language: &str, category: FillerCategory) -> Option<Vec<u8>> {
        if self.config.cache_enabled
            && let Some(samples) = self.cache.get(&(language.to_owned(), category))
        {
            return Some(crate::audio::wav_wrap(samples, self.tts_sample_rate()));
        }

        let text = filler_text(language, category);
        match self.tts.synthesize(text, &self.voice, language).await {
            Ok(audio) if audio.audio_format == "pcm16" => Some(audio.audio_content),
            Ok(_) | Err(_) => None,
        }
    }

    fn tts_sample_rate(&self) -> u32 {
        44_100
    }
}

fn filler_text(language: &str, category: FillerCategory) -> &'static str {
    match (language, category) {
        ("hi-IN", FillerCategory::ToolExecution) => "ek minute",
        (_, FillerCategory::ToolExecution) => "one moment",
    }
}
