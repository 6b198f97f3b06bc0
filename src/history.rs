//! History Manager (C11): barge-in truncation of the conversation log.

use crate::model::{ConversationLog, TtsPlaybackTracker};

/// On barge-in, rewrite the last assistant message's content to the played
/// prefix plus an interruption marker.
///
/// `playedPrefix` is the concatenation of `tracker.sentence_queue[0..k]`
/// where `k = tracker.played_prefix_count` (the number of sentences whose
/// TTS `complete` event had fired). If the played prefix is shorter than
/// the full content, the assistant message is overwritten; this is the sole
/// legal post-append mutation of an assistant message (§4.11).
pub fn truncate_on_barge_in(log: &mut ConversationLog, tracker: &TtsPlaybackTracker) {
    let played_prefix = tracker.played_prefix();
    let full_content: String = tracker.sentence_queue.join(" ");
    if played_prefix.len() >= full_content.len() {
        return;
    }
    let truncated = if played_prefix.is_empty() {
        "... [interrupted]".to_owned()
    } else {
        format!("{played_prefix}... [interrupted]")
    };
    log.rewrite_last_assistant(truncated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    #[test]
    fn truncates_to_played_prefix() {
        let mut log = ConversationLog::new();
        log.push(Message::user("what's the weather"));
        log.push(Message::assistant("It's sunny today. Expect highs of 25.", Vec::new()));

        let tracker = TtsPlaybackTracker {
            sentence_queue: vec!["It's sunny today.".into(), "Expect highs of 25.".into()],
            played_prefix_count: 1,
            ..Default::default()
        };
        truncate_on_barge_in(&mut log, &tracker);

        assert_eq!(
            log.messages()[1].text_content(),
            Some("It's sunny today.... [interrupted]")
        );
    }

    #[test]
    fn no_truncation_if_everything_was_played() {
        let mut log = ConversationLog::new();
        log.push(Message::assistant("Hello there.", Vec::new()));
        let tracker = TtsPlaybackTracker {
            sentence_queue: vec!["Hello there.".into()],
            played_prefix_count: 1,
            ..Default::default()
        };
        truncate_on_barge_in(&mut log, &tracker);
        assert_eq!(log.messages()[0].text_content(), Some("Hello there."));
    }

    #[test]
    fn empty_played_prefix_still_marks_interruption() {
        let mut log = ConversationLog::new();
        log.push(Message::assistant("Hello there.", Vec::new()));
        let tracker = TtsPlaybackTracker {
            sentence_queue: vec!["Hello there.".into()],
            played_prefix_count: 0,
            ..Default::default()
        };
        truncate_on_barge_in(&mut log, &tracker);
        assert_eq!(
            log.messages()[0].text_content(),
            Some("... [interrupted]")
        );
    }
}
