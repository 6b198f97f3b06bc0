//! Speech-to-Text Stream Driver (C4): session lifecycle, event normalization,
//! and queue-before-ready backpressure handling.
//!
//! Grounded on the `ProviderAdapter`/event-stream split the teacher uses for
//! its LLM side (`fae_llm::provider`), generalized here to STT.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::SttConfig;
use crate::error::{CoreError, Result};
use crate::events::SttEvent;
use crate::model::AudioFrame;

/// One upstream STT session, opened for the lifetime of a pipeline.
#[async_trait]
pub trait SttSession: Send {
    /// Forward one inbound PCM frame to the upstream session.
    async fn write(&mut self, frame: AudioFrame) -> Result<()>;

    /// Signal "no more audio"; the upstream may emit a final trailing result
    /// before `SttEvent::Ended`.
    async fn end(&mut self) -> Result<()>;

    /// Cancel the session immediately. Idempotent.
    async fn abort(&mut self);
}

/// Opens [`SttSession`]s against a concrete upstream provider.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Open a session for the given language and sample rate. Events are
    /// delivered on `events` for the lifetime of the returned session.
    async fn open(
        &self,
        language: &str,
        sample_rate: u32,
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> Result<Box<dyn SttSession>>;
}

/// Wraps a [`Box<dyn SttSession>`] with queue-before-ready backpressure
/// (`spec.md` §4.4, §5's "2 s of audio, drop oldest" guidance).
pub struct SttStreamDriver {
    session: Box<dyn SttSession>,
    ready: bool,
    queue: VecDeque<AudioFrame>,
    max_queued_frames: usize,
}

impl SttStreamDriver {
    /// Wrap a freshly opened session. `max_queued_frames` bounds the
    /// pre-ready queue; see [`Self::queue_capacity_for`] to derive it from
    /// config and an expected frame duration.
    pub fn new(session: Box<dyn SttSession>, max_queued_frames: usize) -> Self {
        Self {
            session,
            ready: false,
            queue: VecDeque::new(),
            max_queued_frames,
        }
    }

    /// Build the queue bound from config and an expected frame duration.
    pub fn queue_capacity_for(config: &SttConfig, frame_ms: f32) -> usize {
        ((config.max_queue_seconds * 1000.0) / frame_ms.max(1.0)).ceil() as usize
    }

    /// Mark the upstream session ready, flushing any queued frames in order.
    pub async fn mark_ready(&mut self) -> Result<()> {
        self.ready = true;
        while let Some(frame) = self.queue.pop_front() {
            self.session.write(frame).await?;
        }
        Ok(())
    }

    /// Forward a frame, queueing it if the upstream isn't ready yet. Drops
    /// the oldest queued frame on overflow, per §5's backpressure policy;
    /// the caller is responsible for logging the drop.
    ///
    /// Returns `true` if a frame was dropped to make room.
    pub async fn write(&mut self, frame: AudioFrame) -> Result<bool> {
        if self.ready {
            self.session.write(frame).await?;
            return Ok(false);
        }
        let mut dropped = false;
        if self.queue.len() >= self.max_queued_frames {
            self.queue.pop_front();
            dropped = true;
        }
        self.queue.push_back(frame);
        Ok(dropped)
    }

    /// Signal end-of-audio to the upstream.
    pub async fn end(&mut self) -> Result<()> {
        self.session.end().await
    }

    /// Abort immediately, discarding any queued frames.
    pub async fn abort(&mut self) {
        self.queue.clear();
        self.session.abort().await;
    }
}

/// Wrap a transport-level failure into [`CoreError::Stt`].
pub fn stt_error(message: impl Into<String>) -> CoreError {
    CoreError::Stt(message.into())
}
