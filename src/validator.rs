//! Transcript validator (C2): decides whether to accept a final transcript.

use crate::config::ValidatorConfig;

/// Why a transcript was rejected, for caller-side logging. The validator
/// itself never logs — it is a pure function; logging is the caller's job
/// (the Turn Arbiter), matching the separation between pure analysis and
/// stage logging elsewhere in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Failed confidence/length rule 1.
    LowConfidenceShort,
    /// Failed minimum-length rule 2.
    TooShort,
    /// Text is purely punctuation, filler sounds, or symbols (rule 3).
    FillerOrPunctuation,
    /// No Latin or Indic script character present (rule 4).
    NoScriptChar,
    /// TTS is playing and the tightened echo-suppression length floor was
    /// not met (rule 5).
    EchoSuppressionShort,
    /// Short text lacking terminal punctuation or an allow-listed phrase
    /// (rule 6).
    IncompleteThought,
}

const FILLER_WORDS: &[&str] = &["um", "uh", "uhh", "umm", "hmm", "hm", "erm", "ah", "uh-huh"];

const SHORT_PHRASE_ALLOWLIST: &[&str] = &[
    "yes", "no", "yeah", "yep", "nope", "ok", "okay", "sure", "thanks", "thank you", "bye",
    "goodbye", "hi", "hello", "hey", "please", "sorry", "got it", "cool", "alright", "right",
];

/// Accept iff ALL six rules of `spec.md` §4.2 pass.
pub fn validate(
    text: &str,
    confidence: f32,
    tts_active: bool,
    config: &ValidatorConfig,
) -> Result<(), RejectionReason> {
    let trimmed = text.trim();
    let trimmed_lower = trimmed.to_lowercase();
    let len = trimmed.chars().count();

    // Rule 1: confidence OR long enough.
    if confidence < config.min_confidence && len < config.long_enough_length {
        return Err(RejectionReason::LowConfidenceShort);
    }

    // Rule 2: minimum length OR short-phrase allow-list.
    if len < config.min_length && !is_short_phrase(&trimmed_lower) {
        return Err(RejectionReason::TooShort);
    }

    // Rule 3: not purely punctuation/filler/symbols.
    if is_filler_or_punctuation(&trimmed_lower) {
        return Err(RejectionReason::FillerOrPunctuation);
    }

    // Rule 4: at least one Latin or Indic script character.
    if !has_script_char(trimmed) {
        return Err(RejectionReason::NoScriptChar);
    }

    // Rule 5: echo suppression tightens the length floor while TTS plays.
    if tts_active && len < config.echo_suppression_min_length {
        return Err(RejectionReason::EchoSuppressionShort);
    }

    // Rule 6: semantic completeness for short text.
    if len < config.semantic_completeness_threshold
        && !ends_with_terminal_punctuation(trimmed)
        && !is_short_phrase(&trimmed_lower)
    {
        return Err(RejectionReason::IncompleteThought);
    }

    Ok(())
}

fn is_short_phrase(trimmed_lower: &str) -> bool {
    SHORT_PHRASE_ALLOWLIST.contains(&trimmed_lower)
}

fn is_filler_or_punctuation(trimmed_lower: &str) -> bool {
    if trimmed_lower.is_empty() {
        return true;
    }
    if FILLER_WORDS.contains(&trimmed_lower) {
        return true;
    }
    !trimmed_lower.chars().any(|c| c.is_alphanumeric())
}

/// Latin or Indic script ranges: Devanagari, Bengali, Gurmukhi (Punjabi),
/// Gujarati, Tamil, Telugu, Kannada, Malayalam.
fn has_script_char(text: &str) -> bool {
    text.chars().any(|c| {
        c.is_ascii_alphabetic()
            || matches!(c as u32,
                0x0900..=0x097F // Devanagari
                | 0x0980..=0x09FF // Bengali
                | 0x0A00..=0x0A7F // Gurmukhi
                | 0x0A80..=0x0AFF // Gujarati
                | 0x0B80..=0x0BFF // Tamil
                | 0x0C00..=0x0C7F // Telugu
                | 0x0C80..=0x0CFF // Kannada
                | 0x0D00..=0x0D7F // Malayalam
            )
    })
}

fn ends_with_terminal_punctuation(trimmed: &str) -> bool {
    trimmed
        .chars()
        .next_back()
        .is_some_and(|c| matches!(c, '.' | '!' | '?' | '।' | '॥'))
}
