//! Turn Orchestrator (C9): the central state machine.
//!
//! Mirrors this crate's pure-function-plus-caller-executes split used by
//! [`crate::validator`] and [`crate::turn_arbiter`]: [`TurnOrchestrator`]
//! owns all turn state and conversation-log mutation but performs no I/O
//! itself. Each transition method returns a list of [`Effect`]s; the owning
//! [`crate::pipeline::Pipeline`] is the only code that talks to the STT/LLM/
//! TTS drivers and the tool registry, keeping this type unit-testable
//! without any async machinery.

use crate::events::TokenUsage;
use crate::filler::FillerCategory;
use crate::history::truncate_on_barge_in;
use crate::model::{ConversationLog, Message, ToolCall, Turn, TurnStatus, TtsPlaybackTracker};
use crate::tools::ToolInvocation;

/// State of the central state machine (`spec.md` §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Waiting for the Turn Arbiter to hand off an accepted user text.
    Idle,
    /// An LLM stream and TTS session are active for the current turn.
    Processing,
    /// A tool call is executing; STT finals are queued, not routed.
    AwaitingTool,
    /// Barge-in or `stop` is unwinding the current turn.
    Aborting,
    /// `stop` has completed; the pipeline refuses further input.
    Terminal,
}

/// A side effect the orchestrator wants the [`crate::pipeline::Pipeline`] to
/// perform. Effects are returned in the order they should be carried out.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Open a fresh LLM stream for the current conversation log.
    StartLlmStream,
    /// Open a fresh TTS session for the current turn.
    StartTtsSession,
    /// Send one sentence to the active TTS session, in the given language.
    SendSentenceToTts {
        /// The sentence text.
        text: String,
        /// BCP-47-ish language tag for this sentence.
        language: String,
    },
    /// Play a filler buffer before the tool executes.
    InvokeFiller {
        /// Detected language of the conversation at tool-call time.
        language: String,
        /// Filler category to play.
        category: FillerCategory,
    },
    /// Execute one tool call, bounded by the per-tool timeout.
    ExecuteTool(ToolInvocation),
    /// Signal TTS end-of-input, only if text was ever sent this turn.
    EndTtsSessionIfTextSent,
    /// Abort the active TTS session immediately.
    AbortTts,
    /// Abort the active LLM stream immediately.
    AbortLlm,
    /// Schedule `Pipeline::stop` after the given grace period.
    ScheduleStop {
        /// Grace period, milliseconds.
        grace_ms: u64,
    },
    /// Emit a normalized event to subscribers.
    Emit(crate::events::PipelineEvent),
}

/// Owns the conversation log and turn state; the reactive core of C9.
pub struct TurnOrchestrator {
    state: OrchestratorState,
    log: ConversationLog,
    turn: Option<Turn>,
    tracker: TtsPlaybackTracker,
    executing_tool: bool,
    queued_user_input: Vec<String>,
    turn_count: u64,
    tool_timeout_s: u64,
    end_call_grace_ms: u64,
    /// Wall-clock deadline of the currently-executing tool call, set on
    /// dispatch. Used by the caller to gate barge-in per `spec.md` §7:
    /// "barge-in during tool execution is ignored ... unless the user
    /// speaks for longer than the tool's remaining time."
    tool_deadline: Option<std::time::Instant>,
    /// Incremented every time a turn is torn down from the outside
    /// (barge-in or stop), so a tool result that outlives the turn that
    /// spawned it can be recognized as stale and dropped.
    epoch: u64,
}

impl TurnOrchestrator {
    /// Build an orchestrator in [`OrchestratorState::Idle`] with an empty
    /// log.
    pub fn new(tool_timeout_s: u64, end_call_grace_ms: u64) -> Self {
        Self {
            state: OrchestratorState::Idle,
            log: ConversationLog::new(),
            turn: None,
            tracker: TtsPlaybackTracker::default(),
            executing_tool: false,
            queued_user_input: Vec::new(),
            turn_count: 0,
            tool_timeout_s,
            end_call_grace_ms,
            tool_deadline: None,
            epoch: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// The conversation log so far.
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Whether a tool is currently executing (STT-final routing gate,
    /// §4.9 "Input gating").
    pub fn is_executing_tool(&self) -> bool {
        self.executing_tool
    }

    /// Deadline of the currently-executing tool call, if any (§7 barge-in
    /// gating).
    pub fn tool_deadline(&self) -> Option<std::time::Instant> {
        self.tool_deadline
    }

    /// Current turn epoch (§7 stale tool-result detection).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of completed turns (testable property 3: strictly monotonic
    /// across `turn_complete` events).
    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    /// Playback-tracking state, read by the barge-in controller and the STT
    /// echo-suppression gate.
    pub fn tts_tracker(&self) -> &TtsPlaybackTracker {
        &self.tracker
    }

    /// Route an STT final per §4.9's input gating: queued while a tool
    /// executes, otherwise handed back to the caller to feed into the Turn
    /// Arbiter.
    pub fn route_stt_final(&mut self, text: String) -> Option<String> {
        if self.executing_tool {
            self.queued_user_input.push(text);
            None
        } else {
            Some(text)
        }
    }

    /// **Idle -> Processing**: the Turn Arbiter delivered an accepted user
    /// text.
    pub fn on_accepted_turn(&mut self, text: String) -> Vec<Effect> {
        self.log.push(Message::user(&text));
        self.turn = Some(Turn::new(text));
        self.tracker.reset();
        self.tracker.active = true;
        self.state = OrchestratorState::Processing;
        vec![Effect::StartTtsSession, Effect::StartLlmStream]
    }

    /// **Processing, on LLM token**: record first-token latency once.
    pub fn on_llm_token(&mut self) {
        if let Some(turn) = &mut self.turn
            && turn.first_llm_token.is_none()
        {
            turn.first_llm_token = Some(std::time::Instant::now());
        }
    }

    /// **Processing, on LLM sentence**: detect language from script ratio,
    /// queue the sentence, and hand it to TTS.
    pub fn on_llm_sentence(&mut self, text: String) -> Vec<Effect> {
        let language = detect_language(&text);
        if let Some(turn) = &mut self.turn {
            turn.sentences.push(text.clone());
        }
        self.tracker.sentence_queue.push(text.clone());
        vec![Effect::SendSentenceToTts { text, language: language.to_owned() }]
    }

    /// **Processing -> AwaitingTool** (on tool-call event): mark
    /// `executingTool`, play a filler, and dispatch the tool invocation.
    pub fn on_llm_tool_call(
        &mut self,
        call: ToolCall,
        session_id: String,
        call_context: serde_json::Value,
    ) -> Vec<Effect> {
        self.executing_tool = true;
        self.state = OrchestratorState::AwaitingTool;
        self.tool_deadline = Some(std::time::Instant::now() + std::time::Duration::from_secs(self.tool_timeout_s));
        if let Some(turn) = &mut self.turn {
            turn.tool_call_count += 1;
        }

        let language = self
            .tracker
            .sentence_queue
            .last()
            .map(|s| detect_language(s).to_owned())
            .unwrap_or_else(|| "en-US".to_owned());

        let invocation = ToolInvocation {
            tool_name: call.function_name.clone(),
            arguments: call.arguments.clone(),
            session_id,
            call_context,
        };

        // Record the assistant's pending tool call so the eventual tool
        // message has a preceding assistant entry to correlate against
        // (testable property 2).
        self.log.push(Message::assistant(String::new(), vec![call]));

        vec![
            Effect::InvokeFiller {
                language,
                category: FillerCategory::ToolExecution,
            },
            Effect::ExecuteTool(invocation),
        ]
    }

    /// Per-tool timeout to use for the just-dispatched invocation.
    pub fn tool_timeout_s(&self) -> u64 {
        self.tool_timeout_s
    }

    /// **AwaitingTool -> Processing** (or terminal, for `end_call`): the
    /// tool registry returned (or timed out).
    pub fn on_tool_result(
        &mut self,
        call_id: String,
        tool_name: String,
        result_json: String,
        is_end_call: bool,
    ) -> Vec<Effect> {
        self.log.push(Message::tool_result(call_id, result_json));
        self.tool_deadline = None;

        if is_end_call {
            self.state = OrchestratorState::Terminal;
            return vec![
                Effect::Emit(crate::events::PipelineEvent::SessionEndRequested { reason: None }),
                Effect::ScheduleStop { grace_ms: self.end_call_grace_ms },
            ];
        }

        self.queued_user_input.clear();
        self.executing_tool = false;
        self.state = OrchestratorState::Processing;
        let _ = tool_name;
        vec![Effect::StartLlmStream]
    }

    /// **Processing -> Idle**: the LLM stream completed.
    pub fn on_llm_complete(&mut self, assistant_text: String, tool_calls: Vec<ToolCall>, usage: Option<TokenUsage>) -> Vec<Effect> {
        let mut effects = Vec::new();
        let text_was_sent = !self.tracker.sentence_queue.is_empty();
        if text_was_sent {
            effects.push(Effect::EndTtsSessionIfTextSent);
        }

        if !assistant_text.is_empty() || !tool_calls.is_empty() {
            self.log.push(Message::assistant(assistant_text, tool_calls));
        }

        let turn_duration_ms = self
            .turn
            .as_ref()
            .map(|t| t.start.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let first_llm_token_ms = self.turn.as_ref().and_then(Turn::first_token_ms);
        let first_tts_byte_ms = self.turn.as_ref().and_then(Turn::first_byte_ms);

        if let Some(turn) = &mut self.turn {
            turn.status = Some(TurnStatus::Completed);
        }

        let _ = usage;
        self.turn_count += 1;
        effects.push(Effect::Emit(crate::events::PipelineEvent::TurnComplete {
            first_llm_token_ms,
            first_tts_byte_ms,
            turn_duration_ms,
        }));

        self.reset_turn();
        effects
    }

    /// Record the first TTS audio byte of the turn.
    pub fn on_first_tts_byte(&mut self) -> Option<Effect> {
        if let Some(turn) = &mut self.turn {
            if turn.first_tts_byte.is_none() {
                turn.first_tts_byte = Some(std::time::Instant::now());
                let latency_ms = turn.first_tts_byte.map(|t| t.duration_since(turn.start).as_millis() as u64).unwrap_or(0);
                return Some(Effect::Emit(crate::events::PipelineEvent::FirstAudioByte { latency_ms }));
            }
        }
        None
    }

    /// A queued sentence's TTS playback completed; advance the played
    /// prefix (§4.11).
    pub fn on_tts_sentence_complete(&mut self) {
        self.tracker.played_prefix_count += 1;
        if let Some(turn) = &mut self.turn
            && let Some(text) = self.tracker.sentence_queue.get(turn.played_sentences.len())
        {
            turn.played_sentences.push(text.clone());
        }
    }

    /// **Any -> Aborting** (barge-in). The in-progress reply has no
    /// completed assistant message yet (that only happens at
    /// [`Self::on_llm_complete`]), so the full queued text is pushed once
    /// and immediately truncated down to the played prefix — satisfying
    /// [`ConversationLog`]'s "rewritten exactly once" contract.
    pub fn on_barge_in(&mut self) -> Vec<Effect> {
        self.epoch += 1;
        self.state = OrchestratorState::Aborting;
        if !self.tracker.sentence_queue.is_empty() {
            let full_text = self.tracker.sentence_queue.join(" ");
            self.log.push(Message::assistant(full_text, Vec::new()));
        }
        truncate_on_barge_in(&mut self.log, &self.tracker);
        if let Some(turn) = &mut self.turn {
            turn.status = Some(TurnStatus::Interrupted);
        }
        self.reset_turn();
        vec![
            Effect::AbortTts,
            Effect::AbortLlm,
            Effect::Emit(crate::events::PipelineEvent::BargeIn),
        ]
    }

    /// The LLM stream failed mid-turn: mark the turn failed, abort TTS, and
    /// return to [`OrchestratorState::Idle`].
    pub fn on_llm_error(&mut self, message: String) -> Vec<Effect> {
        if let Some(turn) = &mut self.turn {
            turn.status = Some(TurnStatus::Failed);
        }
        self.reset_turn();
        vec![
            Effect::AbortTts,
            Effect::Emit(crate::events::PipelineEvent::Error { message }),
        ]
    }

    /// The upstream TTS session reported done; playback is believed to
    /// continue for `tail` more (`BargeInConfig::estimated_playback_tail_ms`),
    /// during which inbound audio is still routed through the barge-in
    /// gate. Returns the estimated wall-clock end so the caller can schedule
    /// [`Self::on_playback_tail_elapsed`].
    pub fn on_tts_session_complete(&mut self, tail: std::time::Duration) -> std::time::Instant {
        let end = std::time::Instant::now() + tail;
        self.tracker.playback_end = Some(end);
        end
    }

    /// The estimated playback tail has elapsed; TTS is no longer considered
    /// active for barge-in/echo-suppression purposes.
    pub fn on_playback_tail_elapsed(&mut self) {
        self.tracker.active = false;
    }

    /// **Any -> terminal** (explicit `stop`, or silent barge-in per §7
    /// "Stop mid-turn"). `emit_barge_in` distinguishes the two: `stop`
    /// truncates history the same way but emits no `barge_in` event.
    pub fn on_stop(&mut self) -> Vec<Effect> {
        self.epoch += 1;
        truncate_on_barge_in(&mut self.log, &self.tracker);
        self.state = OrchestratorState::Terminal;
        self.reset_turn();
        vec![Effect::AbortTts, Effect::AbortLlm]
    }

    fn reset_turn(&mut self) {
        self.turn = None;
        self.tracker.reset();
        self.executing_tool = false;
        self.tool_deadline = None;
        self.queued_user_input.clear();
        if self.state != OrchestratorState::Terminal {
            self.state = OrchestratorState::Idle;
        }
    }
}

/// Detect the language of a sentence by Devanagari-script ratio (`spec.md`
/// §4.9): more than half the characters in the Devanagari block selects
/// `hi-IN`, otherwise `en-US`. A port may extend this per script as needed;
/// only the one ratio named by the spec is implemented here.
pub fn detect_language(text: &str) -> &'static str {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return "en-US";
    }
    let devanagari = text
        .chars()
        .filter(|&c| ('\u{0900}'..='\u{097F}').contains(&c))
        .count();
    if (devanagari as f64) / (total as f64) > 0.5 {
        "hi-IN"
    } else {
        "en-US"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_hindi_above_half_devanagari_ratio() {
        assert_eq!(detect_language("\u{0928}\u{092E}\u{0938}\u{094D}\u{0924}\u{0947}"), "hi-IN");
    }

    #[test]
    fn detects_english_for_latin_text() {
        assert_eq!(detect_language("Hello there"), "en-US");
    }

    #[test]
    fn empty_text_defaults_to_english() {
        assert_eq!(detect_language(""), "en-US");
    }

    #[test]
    fn idle_to_processing_appends_user_message_and_starts_sessions() {
        let mut orch = TurnOrchestrator::new(30, 500);
        let effects = orch.on_accepted_turn("What's my balance?".to_owned());
        assert_eq!(orch.state(), OrchestratorState::Processing);
        assert_eq!(orch.log().messages().len(), 1);
        assert!(matches!(effects[0], Effect::StartTtsSession));
        assert!(matches!(effects[1], Effect::StartLlmStream));
    }

    #[test]
    fn llm_sentence_queues_and_dispatches_to_tts() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("hi".to_owned());
        let effects = orch.on_llm_sentence("Hello there.".to_owned());
        match &effects[0] {
            Effect::SendSentenceToTts { text, language } => {
                assert_eq!(text, "Hello there.");
                assert_eq!(language, "en-US");
            }
            other => unreachable!("expected SendSentenceToTts, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_sets_awaiting_tool_and_appends_pending_assistant() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("book me something".to_owned());
        let call = ToolCall {
            call_id: "c1".into(),
            function_name: "book_appointment".into(),
            arguments: "{}".into(),
        };
        let effects = orch.on_llm_tool_call(call, "sess-1".into(), serde_json::json!({}));
        assert_eq!(orch.state(), OrchestratorState::AwaitingTool);
        assert!(orch.is_executing_tool());
        assert_eq!(orch.log().messages().len(), 2);
        assert!(matches!(effects[0], Effect::InvokeFiller { .. }));
        assert!(matches!(effects[1], Effect::ExecuteTool(_)));
    }

    #[test]
    fn stt_final_is_queued_while_tool_executes() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("book it".to_owned());
        let call = ToolCall {
            call_id: "c1".into(),
            function_name: "book_appointment".into(),
            arguments: "{}".into(),
        };
        orch.on_llm_tool_call(call, "sess-1".into(), serde_json::json!({}));
        assert_eq!(orch.route_stt_final("actually cancel".to_owned()), None);
    }

    #[test]
    fn non_end_call_tool_result_recurses_into_llm() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("book it".to_owned());
        let call = ToolCall {
            call_id: "c1".into(),
            function_name: "book_appointment".into(),
            arguments: "{}".into(),
        };
        orch.on_llm_tool_call(call, "sess-1".into(), serde_json::json!({}));
        let effects = orch.on_tool_result("c1".into(), "book_appointment".into(), "{}".into(), false);
        assert_eq!(orch.state(), OrchestratorState::Processing);
        assert!(!orch.is_executing_tool());
        assert!(matches!(effects[0], Effect::StartLlmStream));
    }

    #[test]
    fn end_call_tool_result_schedules_stop_without_recursing() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("end the call".to_owned());
        let call = ToolCall {
            call_id: "c1".into(),
            function_name: "end_call".into(),
            arguments: "{}".into(),
        };
        orch.on_llm_tool_call(call, "sess-1".into(), serde_json::json!({}));
        let effects = orch.on_tool_result("c1".into(), "end_call".into(), "{}".into(), true);
        assert_eq!(orch.state(), OrchestratorState::Terminal);
        assert!(matches!(effects[0], Effect::Emit(crate::events::PipelineEvent::SessionEndRequested { .. })));
        assert!(matches!(effects[1], Effect::ScheduleStop { grace_ms: 500 }));
    }

    #[test]
    fn llm_complete_emits_turn_complete_and_resets_to_idle() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("hi".to_owned());
        orch.on_llm_sentence("Hello.".to_owned());
        let effects = orch.on_llm_complete("Hello.".to_owned(), Vec::new(), None);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(orch.turn_count(), 1);
        assert!(effects.iter().any(|e| matches!(e, Effect::Emit(crate::events::PipelineEvent::TurnComplete { .. }))));
    }

    #[test]
    fn turn_count_is_monotonic_across_turns() {
        let mut orch = TurnOrchestrator::new(30, 500);
        for i in 0..3 {
            orch.on_accepted_turn(format!("turn {i}"));
            orch.on_llm_complete("ok.".to_owned(), Vec::new(), None);
        }
        assert_eq!(orch.turn_count(), 3);
    }

    #[test]
    fn barge_in_truncates_history_and_returns_to_idle() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("hi".to_owned());
        orch.on_llm_sentence("Hello there.".to_owned());
        let effects = orch.on_barge_in();
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(!orch.is_executing_tool());
        assert!(effects.iter().any(|e| matches!(e, Effect::Emit(crate::events::PipelineEvent::BargeIn))));
        let last = orch.log().messages().last().expect("assistant message");
        assert_eq!(last.text_content(), Some("... [interrupted]"));
    }

    #[test]
    fn llm_error_marks_turn_failed_and_returns_to_idle() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("hi".to_owned());
        let effects = orch.on_llm_error("connection reset".to_owned());
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(matches!(effects[0], Effect::AbortTts));
    }

    #[test]
    fn playback_tail_elapsed_clears_active_flag() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("hi".to_owned());
        assert!(orch.tts_tracker().active);
        orch.on_tts_session_complete(std::time::Duration::from_millis(10));
        orch.on_playback_tail_elapsed();
        assert!(!orch.tts_tracker().active);
    }

    #[test]
    fn tool_call_sets_deadline_and_tool_result_clears_it() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("book it".to_owned());
        assert!(orch.tool_deadline().is_none());
        let call = ToolCall {
            call_id: "c1".into(),
            function_name: "book_appointment".into(),
            arguments: "{}".into(),
        };
        orch.on_llm_tool_call(call, "sess-1".into(), serde_json::json!({}));
        let deadline = orch.tool_deadline().expect("deadline set on dispatch");
        assert!(deadline > std::time::Instant::now());
        orch.on_tool_result("c1".into(), "book_appointment".into(), "{}".into(), false);
        assert!(orch.tool_deadline().is_none());
    }

    #[test]
    fn barge_in_and_stop_advance_epoch() {
        let mut orch = TurnOrchestrator::new(30, 500);
        assert_eq!(orch.epoch(), 0);
        orch.on_accepted_turn("hi".to_owned());
        orch.on_barge_in();
        assert_eq!(orch.epoch(), 1);
        orch.on_accepted_turn("hi again".to_owned());
        orch.on_stop();
        assert_eq!(orch.epoch(), 2);
    }

    #[test]
    fn stop_reaches_terminal_without_barge_in_event() {
        let mut orch = TurnOrchestrator::new(30, 500);
        orch.on_accepted_turn("hi".to_owned());
        let effects = orch.on_stop();
        assert_eq!(orch.state(), OrchestratorState::Terminal);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Emit(crate::events::PipelineEvent::BargeIn))));
    }
}
