//! The per-call actor: wires C1-C11 into one cooperative event loop.
//!
//! Grounded on the teacher's `pipeline::coordinator::PipelineCoordinator` —
//! a builder-configured actor that spawns one task per upstream connection
//! and funnels everything back through `tokio::select!` — generalized from
//! the teacher's N-stage fan-out to the single serialized event queue
//! `spec.md` §5 and §9 require: every driver task's events, every timer
//! firing, and every tool-execution result are normalized into one
//! [`Internal`] enum and drained by exactly one consumer, [`PipelineActor::run`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::barge_in::BargeInController;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::events::{LlmEvent, PipelineEvent, SttEvent, TtsEvent};
use crate::filler::{FillerCategory, FillerPlayer};
use crate::llm::accumulator::ToolCallAccumulator;
use crate::llm::provider::{ProviderAdapter, RequestOptions};
use crate::llm::sentence::SentenceSplitter;
use crate::metrics::{MetricsCollector, TurnMetrics};
use crate::model::{AudioFrame, Message};
use crate::orchestrator::{Effect, OrchestratorState, TurnOrchestrator};
use crate::session::{SessionConfig, SessionStore};
use crate::stt::{SttProvider, SttStreamDriver};
use crate::tools::{ToolDefinition, ToolInvocation, ToolRegistry, dedupe_by_sanitized_name};
use crate::tts::{TtsProvider, TtsSession, TtsStreamDriver};
use crate::turn_arbiter::TurnArbiter;
use crate::validator::validate;

/// External collaborators a [`Pipeline`] is constructed with (§6, §9 "no
/// global provider registry" — the caller injects concrete implementations
/// rather than the core resolving them from a process-global factory).
pub struct PipelineDeps {
    /// STT provider (C4).
    pub stt: Arc<dyn SttProvider>,
    /// LLM provider (C5).
    pub llm: Arc<dyn ProviderAdapter>,
    /// TTS provider (C6, and the Filler Player's one-shot fallback).
    pub tts: Arc<dyn TtsProvider>,
    /// Tool registry (§6).
    pub tools: Arc<dyn ToolRegistry>,
    /// Metrics sink (C10).
    pub metrics: Arc<dyn MetricsCollector>,
    /// Session store (§6).
    pub session: Arc<dyn SessionStore>,
}

/// Commands a host sends into a running [`Pipeline`].
pub enum PipelineCommand {
    /// One inbound PCM frame.
    Audio(AudioFrame),
    /// Stop the pipeline: equivalent to a silent barge-in (§7).
    Stop,
}

/// A handle to a running pipeline actor. Cheap to clone; all clones share
/// the same underlying actor task.
#[derive(Clone)]
pub struct Pipeline {
    command_tx: mpsc::UnboundedSender<PipelineCommand>,
    events_tx: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Construct the deps, spawn the actor task, and return a handle. The
    /// actor opens its STT session and enters its event loop in the
    /// background; this call returns immediately.
    pub fn start(config: CoreConfig, deps: PipelineDeps) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, _unused_rx) = broadcast::channel(256);
        let cancel = CancellationToken::new();

        let handle = Self {
            command_tx,
            events_tx: events_tx.clone(),
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            let mut actor = PipelineActor::new(config, deps, events_tx, cancel, command_rx).await;
            actor.run().await;
        });

        handle
    }

    /// Forward one inbound PCM frame to the actor. Errors only if the actor
    /// task has already terminated.
    pub fn write_audio(&self, frame: AudioFrame) -> Result<()> {
        self.command_tx
            .send(PipelineCommand::Audio(frame))
            .map_err(|_| CoreError::Channel("pipeline actor is gone".to_owned()))
    }

    /// Request a graceful stop. Idempotent (testable property 7): once the
    /// actor has terminated, further sends are no-ops.
    pub fn stop(&self) {
        let _ = self.command_tx.send(PipelineCommand::Stop);
    }

    /// Subscribe to the normalized event stream (§6).
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }

    /// The pipeline's cancellation token, cancelled once the actor reaches
    /// [`OrchestratorState::Terminal`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Normalized messages the actor's single event queue drains (§5, §9). Every
/// upstream connection and every scheduled timer is a task that forwards
/// into this one channel; nothing talks to the orchestrator except
/// [`PipelineActor::run`].
enum Internal {
    Stt(SttEvent),
    Llm(LlmEvent),
    Tts(TtsEvent),
    DebounceFired(crate::turn_arbiter::DebounceToken),
    ToolResult {
        call_id: String,
        tool_name: String,
        is_end_call: bool,
        result_json: String,
        /// Orchestrator epoch at dispatch time, so a result that outlives
        /// the turn that spawned it (barge-in/stop raced the tool) can be
        /// recognized as stale and dropped.
        epoch: u64,
    },
    PlaybackTailElapsed,
    ScheduledStop,
    /// A background TTS session-open attempt settled (§5: the LLM stream
    /// and the TTS session are established in parallel, so this never
    /// blocks `Effect::StartLlmStream`).
    TtsSessionOpened {
        language: String,
        result: Result<Box<dyn TtsSession>>,
    },
}

struct PipelineActor {
    config: CoreConfig,
    deps: PipelineDeps,
    session_config: SessionConfig,
    session_id: String,
    tool_definitions: Vec<ToolDefinition>,

    orchestrator: TurnOrchestrator,
    turn_arbiter: TurnArbiter,
    barge_in: BargeInController,
    filler: FillerPlayer,

    stt_driver: Option<SttStreamDriver>,
    tts_driver: Option<TtsStreamDriver>,
    current_tts_language: Option<String>,
    llm_task: Option<tokio::task::JoinHandle<()>>,
    tool_task: Option<tokio::task::JoinHandle<()>>,

    sentence_splitter: SentenceSplitter,
    tool_accumulator: ToolCallAccumulator,
    current_llm_text: String,
    pending_tool: Option<(String, String, bool)>, // (call_id, tool_name, is_end_call)
    turn_sentence_count: u32,
    turn_tool_call_count: u32,

    events_tx: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
    command_rx: mpsc::UnboundedReceiver<PipelineCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl PipelineActor {
    async fn new(
        config: CoreConfig,
        deps: PipelineDeps,
        events_tx: broadcast::Sender<PipelineEvent>,
        cancel: CancellationToken,
        command_rx: mpsc::UnboundedReceiver<PipelineCommand>,
    ) -> Self {
        let session_config = deps.session.config();
        let session_id = deps.session.session_id().to_owned();
        let tool_definitions = dedupe_by_sanitized_name(deps.tools.get_definitions());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let orchestrator = TurnOrchestrator::new(config.tool.default_timeout_s, config.tool.end_call_grace_ms);
        let turn_arbiter = TurnArbiter::new(config.turn.clone());
        let barge_in = BargeInController::new(config.barge_in.clone());
        let filler = FillerPlayer::new(
            config.filler.clone(),
            std::collections::HashMap::new(),
            deps.tts.clone(),
            session_config.tts_voice.clone(),
        );

        let mut actor = Self {
            config,
            deps,
            session_config,
            session_id,
            tool_definitions,
            orchestrator,
            turn_arbiter,
            barge_in,
            filler,
            stt_driver: None,
            tts_driver: None,
            current_tts_language: None,
            llm_task: None,
            tool_task: None,
            sentence_splitter: SentenceSplitter::new(),
            tool_accumulator: ToolCallAccumulator::new(),
            current_llm_text: String::new(),
            pending_tool: None,
            turn_sentence_count: 0,
            turn_tool_call_count: 0,
            events_tx,
            cancel,
            command_rx,
            internal_tx,
            internal_rx,
        };
        actor.open_stt_session().await;
        actor
    }

    /// The single consumer loop. Every branch processes exactly one message
    /// before looping, preserving the turn lock's single-mutator discipline
    /// even though three upstream connections run concurrently.
    async fn run(&mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PipelineCommand::Audio(frame) => self.handle_audio(frame).await,
                        PipelineCommand::Stop => {
                            self.do_stop().await;
                            break;
                        }
                    }
                }
                Some(msg) = self.internal_rx.recv() => self.handle_internal(msg).await,
                else => break,
            }

            self.sync_turn_arbiter_busy_flag();

            if self.orchestrator.state() == OrchestratorState::Terminal {
                break;
            }
        }
        self.cancel.cancel();
    }

    fn sync_turn_arbiter_busy_flag(&mut self) {
        if self.orchestrator.state() == OrchestratorState::Idle {
            self.turn_arbiter.mark_turn_ended();
        } else {
            self.turn_arbiter.mark_turn_started();
        }
    }

    // -- Inbound audio -----------------------------------------------------

    async fn handle_audio(&mut self, frame: AudioFrame) {
        let rms = frame.rms();
        if self.orchestrator.tts_tracker().active {
            // Echo-suppression gate (testable property 4): no STT write
            // while TTS is active. The barge-in controller is the only
            // consumer of inbound audio during playback.
            if self.barge_in.observe(rms) {
                self.trigger_barge_in().await;
            }
            return;
        }

        let Some(driver) = &mut self.stt_driver else {
            return;
        };
        match driver.write(frame).await {
            Ok(true) => tracing::warn!(session = %self.session_id, "stt queue overflow, dropped oldest frame"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(session = %self.session_id, %err, "stt write failed");
                let _ = self.events_tx.send(PipelineEvent::Error { message: err.to_string() });
            }
        }
    }

    // -- Internal event dispatch --------------------------------------------

    async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Stt(event) => self.handle_stt_event(event).await,
            Internal::Llm(event) => self.handle_llm_event(event).await,
            Internal::Tts(event) => self.handle_tts_event(event).await,
            Internal::DebounceFired(token) => self.handle_debounce_fired(token).await,
            Internal::ToolResult { call_id, tool_name, is_end_call, result_json, epoch } => {
                self.tool_task = None;
                if epoch != self.orchestrator.epoch() {
                    tracing::debug!(session = %self.session_id, call_id = %call_id, "dropping stale tool result from an aborted turn");
                } else {
                    let effects = self.orchestrator.on_tool_result(call_id, tool_name, result_json, is_end_call);
                    self.apply_effects(effects).await;
                }
            }
            Internal::PlaybackTailElapsed => {
                self.orchestrator.on_playback_tail_elapsed();
                self.barge_in.reset();
            }
            Internal::ScheduledStop => self.do_stop().await,
            Internal::TtsSessionOpened { language, result } => {
                self.on_tts_session_opened(language, result).await;
            }
        }
    }

    async fn on_tts_session_opened(&mut self, language: String, result: Result<Box<dyn TtsSession>>) {
        match result {
            Ok(session) => {
                let mut driver = TtsStreamDriver::new(session, &self.config.tts, self.deps.tts.emits_raw_pcm());
                if let Err(err) = driver.mark_ready().await {
                    tracing::warn!(session = %self.session_id, %err, "tts session failed to become ready");
                }
                self.tts_driver = Some(driver);
                self.current_tts_language = Some(language);
            }
            Err(err) => {
                tracing::warn!(session = %self.session_id, %err, "failed to open tts session");
                let _ = self.events_tx.send(PipelineEvent::Error { message: err.to_string() });
            }
        }
    }

    async fn handle_stt_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Partial { text } => {
                self.turn_arbiter.on_partial();
                let _ = self.events_tx.send(PipelineEvent::SttPartial { text });
            }
            SttEvent::Final { text, confidence } => {
                if let Some(routed) = self.orchestrator.route_stt_final(text) {
                    let (wait, token) = self.turn_arbiter.on_final(&routed, confidence);
                    self.schedule_debounce(wait, token);
                }
            }
            SttEvent::Error { message } => {
                tracing::warn!(session = %self.session_id, %message, "stt upstream error");
                let _ = self.events_tx.send(PipelineEvent::Error { message });
            }
            SttEvent::Ended => {
                if let Some((text, confidence)) = self.turn_arbiter.on_session_ended() {
                    self.try_accept_turn(text, confidence).await;
                }
            }
        }
    }

    async fn handle_debounce_fired(&mut self, token: crate::turn_arbiter::DebounceToken) {
        use crate::turn_arbiter::ArbiterOutcome;
        match self.turn_arbiter.fire(token) {
            ArbiterOutcome::Superseded | ArbiterOutcome::DroppedBusy => {}
            ArbiterOutcome::ReadyForValidation { text, confidence } => {
                self.try_accept_turn(text, confidence).await;
            }
        }
    }

    async fn try_accept_turn(&mut self, text: String, confidence: f32) {
        let tts_active = self.orchestrator.tts_tracker().active;
        match validate(&text, confidence, tts_active, &self.config.validator) {
            Ok(()) => {
                let _ = self.events_tx.send(PipelineEvent::SttFinal { text: text.clone() });
                self.turn_sentence_count = 0;
                self.turn_tool_call_count = 0;
                self.turn_arbiter.mark_turn_started();
                let effects = self.orchestrator.on_accepted_turn(text);
                self.apply_effects(effects).await;
            }
            Err(reason) => {
                tracing::debug!(session = %self.session_id, ?reason, text = %text, "transcript rejected");
            }
        }
    }

    async fn handle_llm_event(&mut self, event: LlmEvent) {
        match event {
            LlmEvent::StreamStart | LlmEvent::ThinkingStart | LlmEvent::ThinkingDelta { .. } | LlmEvent::ThinkingEnd => {}
            LlmEvent::TextDelta { text } => {
                self.orchestrator.on_llm_token();
                self.current_llm_text.push_str(&text);
                let _ = self.events_tx.send(PipelineEvent::LlmToken { text: text.clone() });
                if let Some(sentence) = self.sentence_splitter.push_token(&text) {
                    self.dispatch_sentence(sentence).await;
                }
            }
            LlmEvent::ToolCallStart { .. } | LlmEvent::ToolCallArgsDelta { .. } => {
                self.tool_accumulator.observe(&event);
            }
            LlmEvent::ToolCallEnd { .. } => {
                if let Some(call) = self.tool_accumulator.observe(&event) {
                    let _ = self.events_tx.send(PipelineEvent::LlmToolCall { call: call.clone() });
                    let is_end_call = call.function_name == "end_call";
                    self.pending_tool = Some((call.call_id.clone(), call.function_name.clone(), is_end_call));
                    self.turn_tool_call_count += 1;
                    let effects = self.orchestrator.on_llm_tool_call(
                        call,
                        self.session_id.clone(),
                        self.session_config.call_context.clone(),
                    );
                    self.apply_effects(effects).await;
                }
            }
            LlmEvent::StreamEnd { usage } => {
                if self.orchestrator.state() == OrchestratorState::AwaitingTool {
                    // Testable property 10: a tool-only response has no
                    // residual text and no TTS `end` call.
                    return;
                }
                if let Some(sentence) = self.sentence_splitter.flush() {
                    self.dispatch_sentence(sentence).await;
                }
                let assistant_text = std::mem::take(&mut self.current_llm_text);
                let effects = self.orchestrator.on_llm_complete(assistant_text, Vec::new(), usage);
                self.apply_effects(effects).await;
            }
            LlmEvent::StreamError { message } => {
                let effects = self.orchestrator.on_llm_error(message);
                self.apply_effects(effects).await;
            }
        }
    }

    async fn dispatch_sentence(&mut self, sentence: String) {
        let _ = self.events_tx.send(PipelineEvent::LlmSentence { text: sentence.clone() });
        self.turn_sentence_count += 1;
        let effects = self.orchestrator.on_llm_sentence(sentence);
        self.apply_effects(effects).await;
    }

    async fn handle_tts_event(&mut self, event: TtsEvent) {
        match event {
            TtsEvent::AudioChunk { bytes } => {
                let chunks = match &mut self.tts_driver {
                    Some(driver) => driver.accept_audio_chunk(bytes),
                    None => return,
                };
                for chunk in chunks {
                    if let Some(effect) = self.orchestrator.on_first_tts_byte() {
                        self.apply_effects(vec![effect]).await;
                    }
                    let _ = self.events_tx.send(PipelineEvent::TtsAudioChunk { bytes: chunk });
                }
            }
            TtsEvent::Complete => {
                if let Some(driver) = &mut self.tts_driver
                    && let Some(chunk) = driver.flush_residual()
                {
                    let _ = self.events_tx.send(PipelineEvent::TtsAudioChunk { bytes: chunk });
                }
                self.orchestrator.on_tts_sentence_complete();
                let tail = Duration::from_millis(self.config.barge_in.estimated_playback_tail_ms);
                self.orchestrator.on_tts_session_complete(tail);
                self.schedule_playback_tail(tail);
            }
            TtsEvent::Error { message } => {
                tracing::warn!(session = %self.session_id, %message, "tts upstream error");
                let _ = self.events_tx.send(PipelineEvent::Error { message });
            }
        }
    }

    // -- Barge-in / stop -----------------------------------------------------

    async fn trigger_barge_in(&mut self) {
        // §7 "Barge-in during tool execution": favour completing the tool
        // response unless the user keeps interrupting past the tool's own
        // deadline.
        if self.orchestrator.is_executing_tool()
            && let Some(deadline) = self.orchestrator.tool_deadline()
            && std::time::Instant::now() < deadline
        {
            tracing::debug!(
                session = %self.session_id,
                "barge-in suppressed: tool call still within its timeout budget"
            );
            return;
        }

        let effects = self.orchestrator.on_barge_in();
        self.reset_turn_local_state();
        self.apply_effects(effects).await;
        self.deps.session.persist_log(self.orchestrator.log());
    }

    async fn do_stop(&mut self) {
        let effects = self.orchestrator.on_stop();
        self.reset_turn_local_state();
        self.apply_effects(effects).await;
        if let Some(driver) = &mut self.stt_driver {
            driver.abort().await;
        }
        self.deps.session.persist_log(self.orchestrator.log());
        self.cancel.cancel();
    }

    fn reset_turn_local_state(&mut self) {
        self.sentence_splitter = SentenceSplitter::new();
        self.tool_accumulator = ToolCallAccumulator::new();
        self.current_llm_text.clear();
        self.pending_tool = None;
        if let Some(handle) = self.tool_task.take() {
            handle.abort();
        }
        self.turn_sentence_count = 0;
        self.turn_tool_call_count = 0;
        self.current_tts_language = None;
    }

    // -- Effects --------------------------------------------------------------

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::StartTtsSession => {
                    // Spawned, not awaited: §5 requires the LLM stream and
                    // the TTS session to be established in parallel, so
                    // this must not delay `Effect::StartLlmStream` below by
                    // a full upstream round trip.
                    let language = self.config.tts.language.clone();
                    self.spawn_tts_session_open(language);
                }
                Effect::StartLlmStream => {
                    if let Some(more) = self.start_llm_stream().await {
                        queue.extend(more);
                    }
                }
                Effect::SendSentenceToTts { text, language } => {
                    self.send_sentence_to_tts(text, language).await;
                }
                Effect::InvokeFiller { language, category } => {
                    self.invoke_filler(&language, category).await;
                }
                Effect::ExecuteTool(invocation) => self.spawn_tool_execution(invocation),
                Effect::EndTtsSessionIfTextSent => self.end_tts_session().await,
                Effect::AbortTts => self.abort_tts().await,
                Effect::AbortLlm => self.abort_llm(),
                Effect::ScheduleStop { grace_ms } => self.schedule_stop(grace_ms),
                Effect::Emit(event) => self.emit(event),
            }
        }
    }

    fn emit(&mut self, event: PipelineEvent) {
        if let PipelineEvent::TurnComplete { first_llm_token_ms, first_tts_byte_ms, turn_duration_ms } = &event {
            let metrics = TurnMetrics {
                first_llm_token_ms: *first_llm_token_ms,
                first_tts_byte_ms: *first_tts_byte_ms,
                turn_duration_ms: *turn_duration_ms,
                sentence_count: self.turn_sentence_count,
                tool_call_count: self.turn_tool_call_count,
            };
            self.deps.metrics.record_turn(&metrics);
            self.deps.session.persist_turn_metrics(&metrics);
            self.deps.session.persist_log(self.orchestrator.log());
            self.reset_turn_local_state();
        }
        let _ = self.events_tx.send(event);
    }

    // -- STT ------------------------------------------------------------------

    async fn open_stt_session(&mut self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SttEvent>();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal_tx.send(Internal::Stt(event)).is_err() {
                    break;
                }
            }
        });

        let sample_rate = self.config.audio.input_sample_rate;
        match self
            .deps
            .stt
            .open(&self.session_config.stt_language, sample_rate, tx)
            .await
        {
            Ok(session) => {
                let max_queued = SttStreamDriver::queue_capacity_for(&self.config.stt, 40.0);
                let mut driver = SttStreamDriver::new(session, max_queued);
                if let Err(err) = driver.mark_ready().await {
                    tracing::error!(session = %self.session_id, %err, "stt session failed to become ready");
                }
                self.stt_driver = Some(driver);
            }
            Err(err) => {
                tracing::error!(session = %self.session_id, %err, "failed to open stt session");
                let _ = self.events_tx.send(PipelineEvent::Error { message: err.to_string() });
            }
        }
    }

    // -- TTS ------------------------------------------------------------------

    /// Opens a TTS session without blocking the caller, forwarding the
    /// outcome back through the single event queue (`Internal::
    /// TtsSessionOpened`) once the upstream round trip settles.
    fn spawn_tts_session_open(&mut self, language: String) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TtsEvent>();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal_tx.send(Internal::Tts(event)).is_err() {
                    break;
                }
            }
        });

        let tts = self.deps.tts.clone();
        let voice = self.session_config.tts_voice.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tts.open_stream(&voice, &language, tx).await;
            let _ = internal_tx.send(Internal::TtsSessionOpened { language, result });
        });
    }

    async fn open_tts_session(&mut self, language: &str) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TtsEvent>();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal_tx.send(Internal::Tts(event)).is_err() {
                    break;
                }
            }
        });

        match self
            .deps
            .tts
            .open_stream(&self.session_config.tts_voice, language, tx)
            .await
        {
            Ok(session) => {
                let mut driver = TtsStreamDriver::new(session, &self.config.tts, self.deps.tts.emits_raw_pcm());
                if let Err(err) = driver.mark_ready().await {
                    tracing::warn!(session = %self.session_id, %err, "tts session failed to become ready");
                }
                self.tts_driver = Some(driver);
                self.current_tts_language = Some(language.to_owned());
            }
            Err(err) => {
                tracing::warn!(session = %self.session_id, %err, "failed to open tts session");
                let _ = self.events_tx.send(PipelineEvent::Error { message: err.to_string() });
            }
        }
    }

    async fn send_sentence_to_tts(&mut self, text: String, language: String) {
        if self.current_tts_language.as_deref() != Some(language.as_str()) {
            if let Some(mut driver) = self.tts_driver.take() {
                driver.abort().await;
            }
            self.open_tts_session(&language).await;
        }
        if let Some(driver) = &mut self.tts_driver
            && let Err(err) = driver.send_text(&text).await
        {
            tracing::warn!(session = %self.session_id, %err, "tts send_text failed");
            let _ = self.events_tx.send(PipelineEvent::Error { message: err.to_string() });
        }
    }

    async fn end_tts_session(&mut self) {
        let Some(driver) = &mut self.tts_driver else {
            return;
        };
        if !driver.has_sent_text() {
            return;
        }
        let timeout = driver.end_timeout();
        match tokio::time::timeout(timeout, driver.end()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(session = %self.session_id, %err, "tts end failed"),
            Err(_) => tracing::warn!(session = %self.session_id, ?timeout, "tts end timed out"),
        }
    }

    async fn abort_tts(&mut self) {
        if let Some(mut driver) = self.tts_driver.take() {
            driver.abort().await;
        }
        self.current_tts_language = None;
    }

    // -- LLM ------------------------------------------------------------------

    async fn start_llm_stream(&mut self) -> Option<Vec<Effect>> {
        self.current_llm_text.clear();
        self.sentence_splitter = SentenceSplitter::new();
        self.tool_accumulator = ToolCallAccumulator::new();

        let messages = self.trimmed_messages();
        let system_prompt = if self.session_config.llm_system_prompt.is_empty() {
            self.config.llm.system_prompt.clone()
        } else {
            self.session_config.llm_system_prompt.clone()
        };
        let options = RequestOptions::new()
            .with_temperature(self.config.llm.temperature)
            .with_max_tokens(self.config.llm.max_tokens)
            .with_system_prompt(system_prompt);

        match self.deps.llm.send(&messages, &options, &self.tool_definitions).await {
            Ok(mut stream) => {
                let internal_tx = self.internal_tx.clone();
                let handle = tokio::spawn(async move {
                    while let Some(event) = stream.next().await {
                        if internal_tx.send(Internal::Llm(event)).is_err() {
                            break;
                        }
                    }
                });
                self.llm_task = Some(handle);
                None
            }
            Err(err) => {
                tracing::warn!(session = %self.session_id, %err, "failed to start llm stream");
                Some(self.orchestrator.on_llm_error(err.to_string()))
            }
        }
    }

    fn abort_llm(&mut self) {
        if let Some(handle) = self.llm_task.take() {
            handle.abort();
        }
    }

    fn trimmed_messages(&self) -> Vec<Message> {
        let all = self.orchestrator.log().messages();
        let max = self.config.llm.max_history_messages;
        if all.len() > max {
            all[all.len() - max..].to_vec()
        } else {
            all.to_vec()
        }
    }

    // -- Filler / tools --------------------------------------------------------

    async fn invoke_filler(&mut self, language: &str, category: FillerCategory) {
        if let Some(bytes) = self.filler.play(language, category).await {
            let _ = self.events_tx.send(PipelineEvent::TtsAudioChunk { bytes });
        }
    }

    fn spawn_tool_execution(&mut self, invocation: ToolInvocation) {
        let Some((call_id, tool_name, is_end_call)) = self.pending_tool.take() else {
            return;
        };
        let tools = self.deps.tools.clone();
        let timeout = Duration::from_secs(self.orchestrator.tool_timeout_s());
        let internal_tx = self.internal_tx.clone();
        let epoch = self.orchestrator.epoch();

        let handle = tokio::spawn(async move {
            let result_json = match tokio::time::timeout(timeout, tools.execute(invocation)).await {
                Ok(Ok(outcome)) if outcome.success => {
                    outcome.result.unwrap_or_else(|| "null".to_owned())
                }
                Ok(Ok(outcome)) => {
                    let message = outcome.error.unwrap_or_else(|| "tool failed".to_owned());
                    serde_json::json!({ "error": message }).to_string()
                }
                Ok(Err(err)) => serde_json::json!({ "error": err.to_string() }).to_string(),
                Err(_elapsed) => serde_json::json!({ "error": "tool execution timed out" }).to_string(),
            };
            let _ = internal_tx.send(Internal::ToolResult {
                call_id,
                tool_name,
                is_end_call,
                result_json,
                epoch,
            });
        });
        self.tool_task = Some(handle);
    }

    fn schedule_debounce(&mut self, wait: Duration, token: crate::turn_arbiter::DebounceToken) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = internal_tx.send(Internal::DebounceFired(token));
        });
    }

    fn schedule_playback_tail(&mut self, tail: Duration) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tail).await;
            let _ = internal_tx.send(Internal::PlaybackTailElapsed);
        });
    }

    fn schedule_stop(&mut self, grace_ms: u64) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            let _ = internal_tx.send(Internal::ScheduledStop);
        });
    }
}
