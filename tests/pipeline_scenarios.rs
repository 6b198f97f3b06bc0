//! End-to-end scenarios driving a full [`Pipeline`] through scripted
//! provider events: clean happy path, barge-in mid-reply, a tool call with
//! its filler, and the `end_call` tool winding the session down.
//!
//! Every provider/registry here is a hand-written stub implementing the
//! crate's own traits directly (`stt::SttProvider`, `llm::provider::
//! ProviderAdapter`, `tts::TtsProvider`, `tools::ToolRegistry`) rather than a
//! mocked transport, since the contracts under test are already Rust trait
//! objects.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use callcore::config::CoreConfig;
use callcore::error::{CoreError, Result};
use callcore::events::{LlmEvent, PipelineEvent, SttEvent, TtsEvent};
use callcore::llm::provider::{LlmEventStream, ProviderAdapter, RequestOptions};
use callcore::metrics::NoopMetrics;
use callcore::model::{AudioFrame, Message};
use callcore::pipeline::{Pipeline, PipelineDeps};
use callcore::session::{InMemorySessionStore, SessionConfig};
use callcore::stt::{SttProvider, SttSession};
use callcore::tools::{ToolDefinition, ToolInvocation, ToolOutcome, ToolRegistry};
use callcore::tts::{OneShotAudio, TtsProvider, TtsSession};

// -- STT stub -----------------------------------------------------------------

struct ScriptedSttSession;

#[async_trait]
impl SttSession for ScriptedSttSession {
    async fn write(&mut self, _frame: AudioFrame) -> Result<()> {
        Ok(())
    }
    async fn end(&mut self) -> Result<()> {
        Ok(())
    }
    async fn abort(&mut self) {}
}

#[derive(Default)]
struct ScriptedSttProvider {
    events_tx: Mutex<Option<mpsc::UnboundedSender<SttEvent>>>,
}

#[async_trait]
impl SttProvider for ScriptedSttProvider {
    async fn open(
        &self,
        _language: &str,
        _sample_rate: u32,
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> Result<Box<dyn SttSession>> {
        *self.events_tx.lock().expect("lock") = Some(events);
        Ok(Box::new(ScriptedSttSession))
    }
}

// -- TTS stub -----------------------------------------------------------------

struct ScriptedTtsSession {
    sent: Arc<Mutex<Vec<String>>>,
    ended: Arc<Mutex<bool>>,
}

#[async_trait]
impl TtsSession for ScriptedTtsSession {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sent.lock().expect("lock").push(text.to_owned());
        Ok(())
    }
    async fn end(&mut self) -> Result<()> {
        *self.ended.lock().expect("lock") = true;
        Ok(())
    }
    async fn abort(&mut self) {}
}

#[derive(Default)]
struct ScriptedTtsProvider {
    /// One entry per `open_stream` call, in order (a fresh session is opened
    /// per turn, and again on a mid-turn language switch).
    sessions_opened: Mutex<Vec<mpsc::UnboundedSender<TtsEvent>>>,
    sent_texts: Arc<Mutex<Vec<String>>>,
    ended_flags: Mutex<Vec<Arc<Mutex<bool>>>>,
    /// Canned response for the Filler Player's one-shot synthesis fallback.
    synth_reply: Vec<u8>,
}

#[async_trait]
impl TtsProvider for ScriptedTtsProvider {
    async fn open_stream(
        &self,
        _voice: &str,
        _language: &str,
        events: mpsc::UnboundedSender<TtsEvent>,
    ) -> Result<Box<dyn TtsSession>> {
        let ended = Arc::new(Mutex::new(false));
        self.sessions_opened.lock().expect("lock").push(events);
        self.ended_flags.lock().expect("lock").push(ended.clone());
        Ok(Box::new(ScriptedTtsSession {
            sent: self.sent_texts.clone(),
            ended,
        }))
    }

    async fn synthesize(&self, _text: &str, _voice: &str, _language: &str) -> Result<OneShotAudio> {
        Ok(OneShotAudio {
            audio_content: self.synth_reply.clone(),
            audio_format: "pcm16".to_owned(),
            duration_ms: 100,
        })
    }

    fn emits_raw_pcm(&self) -> bool {
        false
    }
}

// -- LLM stub -----------------------------------------------------------------

#[derive(Default)]
struct ScriptedLlmProvider {
    /// One entry per `send` call, in order (a fresh stream is started after
    /// every tool result, per §4.9).
    streams_started: Mutex<Vec<mpsc::UnboundedSender<LlmEvent>>>,
}

#[async_trait]
impl ProviderAdapter for ScriptedLlmProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        _messages: &[Message],
        _options: &RequestOptions,
        _tools: &[ToolDefinition],
    ) -> std::result::Result<LlmEventStream, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams_started.lock().expect("lock").push(tx);
        let stream: Pin<Box<dyn Stream<Item = LlmEvent> + Send>> = Box::pin(UnboundedReceiverStream::new(rx));
        Ok(stream)
    }
}

// -- Tool registry stub -------------------------------------------------------

struct ScriptedToolRegistry {
    definitions: Vec<ToolDefinition>,
    invocations: Arc<Mutex<Vec<ToolInvocation>>>,
    outcome: ToolOutcome,
}

#[async_trait]
impl ToolRegistry for ScriptedToolRegistry {
    fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutcome> {
        self.invocations.lock().expect("lock").push(invocation);
        Ok(self.outcome.clone())
    }
}

// -- Harness ------------------------------------------------------------------

fn fast_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.turn.base_wait_ms = 15;
    config.turn.max_wait_ms = 30;
    config.barge_in.estimated_playback_tail_ms = 15;
    config.barge_in.required_consecutive_frames = 1;
    config.tool.default_timeout_s = 5;
    config.tool.end_call_grace_ms = 15;
    config
}

fn loud_frame() -> AudioFrame {
    AudioFrame::new(vec![20_000; 160], 16_000)
}

async fn wait_until_len<T>(cell: &Mutex<Vec<T>>, len: usize) {
    for _ in 0..300 {
        if cell.lock().expect("lock").len() >= len {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {len} entries");
}

async fn nth_sender<T: Clone>(cell: &Mutex<Vec<T>>, idx: usize) -> T {
    wait_until_len(cell, idx + 1).await;
    cell.lock().expect("lock")[idx].clone()
}

async fn recv_until<F: Fn(&PipelineEvent) -> bool>(rx: &mut broadcast::Receiver<PipelineEvent>, pred: F) -> PipelineEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed early");
        if pred(&event) {
            return event;
        }
    }
}

struct TestRig {
    pipeline: Pipeline,
    events: broadcast::Receiver<PipelineEvent>,
    stt: Arc<ScriptedSttProvider>,
    tts: Arc<ScriptedTtsProvider>,
    llm: Arc<ScriptedLlmProvider>,
    tool_invocations: Arc<Mutex<Vec<ToolInvocation>>>,
    session: Arc<InMemorySessionStore>,
}

fn start_rig(config: CoreConfig, tool_definitions: Vec<ToolDefinition>, tool_outcome: ToolOutcome) -> TestRig {
    let stt = Arc::new(ScriptedSttProvider::default());
    let tts = Arc::new(ScriptedTtsProvider {
        synth_reply: vec![9, 9, 9],
        ..Default::default()
    });
    let llm = Arc::new(ScriptedLlmProvider::default());
    let tool_invocations = Arc::new(Mutex::new(Vec::new()));
    let tools = Arc::new(ScriptedToolRegistry {
        definitions: tool_definitions,
        invocations: tool_invocations.clone(),
        outcome: tool_outcome,
    });
    let session = Arc::new(InMemorySessionStore::new("sess-1", SessionConfig::default()));

    let deps = PipelineDeps {
        stt: stt.clone(),
        llm: llm.clone(),
        tts: tts.clone(),
        tools,
        metrics: Arc::new(NoopMetrics),
        session: session.clone(),
    };

    let pipeline = Pipeline::start(config, deps);
    let events = pipeline.subscribe();

    TestRig {
        pipeline,
        events,
        stt,
        tts,
        llm,
        tool_invocations,
        session,
    }
}

impl TestRig {
    async fn stt_sender(&self) -> mpsc::UnboundedSender<SttEvent> {
        for _ in 0..300 {
            if let Some(tx) = self.stt.events_tx.lock().expect("lock").clone() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stt session never opened");
    }

    async fn push_stt_final(&self, text: &str, confidence: f32) {
        let tx = self.stt_sender().await;
        tx.send(SttEvent::Final { text: text.to_owned(), confidence }).expect("stt channel open");
    }

    async fn llm_sender(&self, call_index: usize) -> mpsc::UnboundedSender<LlmEvent> {
        nth_sender(&self.llm.streams_started, call_index).await
    }

    async fn tts_sender(&self, session_index: usize) -> mpsc::UnboundedSender<TtsEvent> {
        nth_sender(&self.tts.sessions_opened, session_index).await
    }
}

// -- S1: clean happy path -----------------------------------------------------

#[tokio::test]
async fn happy_path_turn_produces_audio_and_completes() {
    let rig = start_rig(fast_config(), Vec::new(), ToolOutcome {
        success: true,
        result: None,
        error: None,
        latency_ms: 0,
    });
    let mut events = rig.events;

    rig.push_stt_final("What's my account balance?", 0.95).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;

    let llm_tx = rig.llm_sender(0).await;
    let tts_tx = rig.tts_sender(0).await;

    llm_tx
        .send(LlmEvent::TextDelta { text: "Your balance is $42. ".to_owned() })
        .expect("llm channel open");
    recv_until(&mut events, |e| matches!(e, PipelineEvent::LlmSentence { .. })).await;

    tts_tx
        .send(TtsEvent::AudioChunk { bytes: vec![1, 2, 3] })
        .expect("tts channel open");
    recv_until(&mut events, |e| matches!(e, PipelineEvent::FirstAudioByte { .. })).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::TtsAudioChunk { .. })).await;

    tts_tx.send(TtsEvent::Complete).expect("tts channel open");
    llm_tx
        .send(LlmEvent::StreamEnd { usage: None })
        .expect("llm channel open");

    let turn_complete = recv_until(&mut events, |e| matches!(e, PipelineEvent::TurnComplete { .. })).await;
    match turn_complete {
        PipelineEvent::TurnComplete { first_tts_byte_ms, .. } => {
            assert!(first_tts_byte_ms.is_some());
        }
        _ => unreachable!(),
    }

    assert_eq!(
        rig.tts.sent_texts.lock().expect("lock").as_slice(),
        ["Your balance is $42.".to_owned()]
    );

    rig.pipeline.stop();
    rig.pipeline.stop(); // idempotent
}

// -- S2: barge-in mid-reply ----------------------------------------------------

#[tokio::test]
async fn barge_in_mid_reply_truncates_history_and_aborts_upstreams() {
    let rig = start_rig(fast_config(), Vec::new(), ToolOutcome {
        success: true,
        result: None,
        error: None,
        latency_ms: 0,
    });
    let mut events = rig.events;

    rig.push_stt_final("Tell me a long story", 0.9).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;

    let llm_tx = rig.llm_sender(0).await;
    let _tts_tx = rig.tts_sender(0).await;

    llm_tx
        .send(LlmEvent::TextDelta { text: "Once upon a time. ".to_owned() })
        .expect("llm channel open");
    recv_until(&mut events, |e| matches!(e, PipelineEvent::LlmSentence { .. })).await;

    // Nothing played yet (no `TtsEvent::Complete`): a loud inbound frame
    // while the turn is in progress confirms a barge-in immediately since
    // `required_consecutive_frames` is 1 in `fast_config`.
    rig.pipeline.write_audio(loud_frame()).expect("pipeline alive");

    recv_until(&mut events, |e| matches!(e, PipelineEvent::BargeIn)).await;

    let log = rig.session.log_snapshot();
    let last = log.messages().last().expect("at least one message");
    assert_eq!(last.text_content(), Some("... [interrupted]"));

    // The pipeline returns to idle and accepts a fresh turn.
    rig.push_stt_final("Never mind", 0.9).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;
}

// -- S3: tool call plays a filler before executing -----------------------------

#[tokio::test]
async fn tool_call_plays_filler_and_resumes_with_llm_stream() {
    let tool_def = ToolDefinition {
        name: "lookup_balance".to_owned(),
        description: "Look up the caller's balance".to_owned(),
        parameters: serde_json::json!({ "type": "object", "properties": {} }),
    };
    let rig = start_rig(
        fast_config(),
        vec![tool_def],
        ToolOutcome {
            success: true,
            result: Some(r#"{"balance":42}"#.to_owned()),
            error: None,
            latency_ms: 5,
        },
    );
    let mut events = rig.events;

    rig.push_stt_final("What's my balance?", 0.9).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;

    let llm_tx = rig.llm_sender(0).await;
    llm_tx
        .send(LlmEvent::ToolCallStart { call_id: "call-1".to_owned(), function_name: "lookup_balance".to_owned() })
        .expect("llm channel open");
    llm_tx
        .send(LlmEvent::ToolCallArgsDelta { call_id: "call-1".to_owned(), text: "{}".to_owned() })
        .expect("llm channel open");
    llm_tx
        .send(LlmEvent::ToolCallEnd { call_id: "call-1".to_owned() })
        .expect("llm channel open");

    recv_until(&mut events, |e| matches!(e, PipelineEvent::LlmToolCall { .. })).await;
    // The filler plays through the one-shot synthesis fallback.
    recv_until(&mut events, |e| matches!(e, PipelineEvent::TtsAudioChunk { bytes } if bytes == &vec![9, 9, 9])).await;

    wait_until_len(&rig.tool_invocations, 1).await;
    let invocation = rig.tool_invocations.lock().expect("lock")[0].clone();
    assert_eq!(invocation.tool_name, "lookup_balance");
    assert_eq!(invocation.session_id, "sess-1");

    // A fresh LLM stream is started with the tool result folded in.
    let llm_tx2 = rig.llm_sender(1).await;
    llm_tx2
        .send(LlmEvent::TextDelta { text: "Your balance is $42. ".to_owned() })
        .expect("llm channel open");
    llm_tx2.send(LlmEvent::StreamEnd { usage: None }).expect("llm channel open");

    recv_until(&mut events, |e| matches!(e, PipelineEvent::TurnComplete { .. })).await;

    let log = rig.session.log_snapshot();
    assert!(
        log.messages()
            .iter()
            .any(|m| m.tool_calls.iter().any(|c| c.function_name == "lookup_balance"))
    );
}

// -- S6: `end_call` tool winds the session down --------------------------------

#[tokio::test]
async fn end_call_tool_requests_session_end_and_stops_pipeline() {
    let tool_def = ToolDefinition {
        name: "end_call".to_owned(),
        description: "Ends the call".to_owned(),
        parameters: serde_json::json!({ "type": "object", "properties": {} }),
    };
    let rig = start_rig(
        fast_config(),
        vec![tool_def],
        ToolOutcome {
            success: true,
            result: Some("null".to_owned()),
            error: None,
            latency_ms: 1,
        },
    );
    let mut events = rig.events;
    let cancel = rig.pipeline.cancel_token();

    rig.push_stt_final("Goodbye, end the call", 0.9).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;

    let llm_tx = rig.llm_sender(0).await;
    llm_tx
        .send(LlmEvent::ToolCallStart { call_id: "call-1".to_owned(), function_name: "end_call".to_owned() })
        .expect("llm channel open");
    llm_tx
        .send(LlmEvent::ToolCallEnd { call_id: "call-1".to_owned() })
        .expect("llm channel open");

    recv_until(&mut events, |e| matches!(e, PipelineEvent::SessionEndRequested { .. })).await;

    tokio::time::timeout(Duration::from_secs(2), cancel.cancelled())
        .await
        .expect("pipeline should stop after the end-call grace period");
}

// -- S4: mid-thought silence is rejected ---------------------------------------

#[tokio::test]
async fn mid_thought_silence_is_rejected_without_llm_call() {
    let rig = start_rig(fast_config(), Vec::new(), ToolOutcome {
        success: true,
        result: None,
        error: None,
        latency_ms: 0,
    });
    let mut events = rig.events;

    // "I want to, um," ends on a mid-thought connective (trailing comma),
    // so the arbiter waits `max_wait_ms`; once it fires, the validator
    // rejects it (too short, no terminal punctuation, not an allow-listed
    // short phrase) per `spec.md` §8 S4.
    rig.push_stt_final("I want to, um,", 0.7).await;

    // Give the debounce timer (30ms in `fast_config`) time to fire and the
    // validator time to reject; no `stt_final` or `turn_complete` event
    // should ever be emitted, and no LLM stream should start.
    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. } | PipelineEvent::TurnComplete { .. })),
    )
    .await;
    assert!(outcome.is_err(), "rejected transcript must not produce stt_final/turn_complete");
    assert!(rig.llm.streams_started.lock().expect("lock").is_empty());

    // The pipeline is still alive and accepts a fresh, validatable turn.
    rig.push_stt_final("What's my balance?", 0.95).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;
}

// -- S5: Hindi-to-English mid-turn language switch -----------------------------

#[tokio::test]
async fn language_switch_mid_turn_reopens_tts_session() {
    let rig = start_rig(fast_config(), Vec::new(), ToolOutcome {
        success: true,
        result: None,
        error: None,
        latency_ms: 0,
    });
    let mut events = rig.events;

    rig.push_stt_final("मेरा बैलेंस क्या है", 0.9).await;
    recv_until(&mut events, |e| matches!(e, PipelineEvent::SttFinal { .. })).await;

    let llm_tx = rig.llm_sender(0).await;
    // Turn-start TTS session (index 0), opened in the configured default
    // language (`en-US`).
    let _initial_tts_tx = rig.tts_sender(0).await;

    // First sentence: Devanagari, ratio > 0.5 ⇒ `hi-IN`. Differs from the
    // session's current language, so the driver aborts and reopens before
    // sending.
    llm_tx
        .send(LlmEvent::TextDelta { text: "आपका बैलेंस पाँच हज़ार रुपये है।".to_owned() })
        .expect("llm channel open");
    recv_until(&mut events, |e| matches!(e, PipelineEvent::LlmSentence { .. })).await;
    let hindi_tts_tx = rig.tts_sender(1).await;

    // Second sentence: also Devanagari ⇒ still `hi-IN`, no reopen.
    llm_tx
        .send(LlmEvent::TextDelta { text: "धन्यवाद।".to_owned() })
        .expect("llm channel open");
    recv_until(&mut events, |e| {
        matches!(e, PipelineEvent::LlmSentence { text } if text == "धन्यवाद।")
    })
    .await;
    assert_eq!(rig.tts.sessions_opened.lock().expect("lock").len(), 2);

    // Third sentence: Latin text ⇒ `en-US`, switched before this sentence
    // is sent.
    llm_tx
        .send(LlmEvent::TextDelta { text: "Is there anything else?".to_owned() })
        .expect("llm channel open");
    recv_until(&mut events, |e| {
        matches!(e, PipelineEvent::LlmSentence { text } if text == "Is there anything else?")
    })
    .await;
    let english_tts_tx = rig.tts_sender(2).await;

    llm_tx.send(LlmEvent::StreamEnd { usage: None }).expect("llm channel open");

    wait_until_len(&rig.tts.sent_texts, 3).await;
    let sent = rig.tts.sent_texts.lock().expect("lock").clone();
    assert_eq!(
        sent,
        vec![
            "आपका बैलेंस पाँच हज़ार रुपये है।".to_owned(),
            "धन्यवाद।".to_owned(),
            "Is there anything else?".to_owned(),
        ]
    );

    // Drain the two reopened TTS sessions so the turn can complete cleanly.
    drop(hindi_tts_tx);
    english_tts_tx.send(TtsEvent::Complete).expect("tts channel open");
    recv_until(&mut events, |e| matches!(e, PipelineEvent::TurnComplete { .. })).await;
}
