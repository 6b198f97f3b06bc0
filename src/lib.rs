//! callcore: the provider-agnostic core of a real-time voice-conversation
//! pipeline for a multi-tenant AI voice-calling backend.
//!
//! This crate owns the turn-taking, barge-in, tool-calling, and transcript
//! bookkeeping that sits between a call's transport (telephony/WebRTC) and
//! its STT/LLM/TTS providers. It does not dial calls, terminate media, or
//! persist anything durably — a host wires a [`pipeline::Pipeline`] to its
//! own transport and to concrete provider/session implementations.
//!
//! # Architecture
//!
//! One [`pipeline::PipelineActor`] runs per call as a single cooperative
//! event loop (`tokio::select!`) draining one unbounded channel. Every
//! upstream connection (STT session, LLM stream, TTS session) and every
//! scheduled timer (debounce, playback tail, tool timeout, end-call grace)
//! is its own small spawned task that normalizes its output and forwards it
//! into that one channel — so the [`orchestrator::TurnOrchestrator`] state
//! machine and the [`turn_arbiter::TurnArbiter`] are never touched from more
//! than one place at a time, by construction.
//!
//! - **Turn Arbiter** ([`turn_arbiter`]): debounces STT finals into a single
//!   accepted user turn.
//! - **Validator** ([`validator`]): rejects empty/low-confidence/noise
//!   transcripts before they reach the orchestrator.
//! - **Barge-in Controller** ([`barge_in`]): watches inbound audio energy
//!   while TTS is playing and confirms genuine interruptions.
//! - **Turn Orchestrator** ([`orchestrator`]): the central state machine;
//!   owns the conversation log and returns effects, performs no I/O itself.
//! - **STT/LLM/TTS drivers** ([`stt`], [`llm`], [`tts`]): provider-agnostic
//!   stream drivers, sentence splitting, and tool-call assembly.
//! - **Filler Player** ([`filler`]): plays a cached or synthesized
//!   acknowledgement while a tool call executes.
//! - **Tool Registry** ([`tools`]): the contract a host implements to expose
//!   callable tools, including `end_call`.
//! - **Session Store** ([`session`]): the contract a host implements to
//!   supply per-call provider configuration and receive transcript/metrics
//!   writes.
//! - **Metrics** ([`metrics`]): per-turn latency and counter collection.

pub mod audio;
pub mod barge_in;
pub mod config;
pub mod error;
pub mod events;
pub mod filler;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod session;
pub mod stt;
pub mod tools;
pub mod tts;
pub mod turn_arbiter;
pub mod validator;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use events::PipelineEvent;
pub use pipeline::{Pipeline, PipelineCommand, PipelineDeps};
pub use session::{SessionConfig, SessionStore};
