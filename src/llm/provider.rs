//! The `ProviderAdapter` contract (C5, §6): the seam between the core and a
//! concrete LLM API, adapted directly from the teacher's
//! `fae_llm::provider`/`fae_llm::events`.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::CoreError;
use crate::events::LlmEvent;
use crate::model::Message;
use crate::tools::ToolDefinition;

/// A boxed stream of normalized [`LlmEvent`]s.
pub type LlmEventStream = Pin<Box<dyn Stream<Item = LlmEvent> + Send>>;

/// Per-request sampling and shaping options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Sampling temperature, if the provider honors it.
    pub temperature: Option<f32>,
    /// Maximum tokens requested.
    pub max_tokens: Option<u32>,
    /// System prompt, sent separately from `messages` (providers vary on
    /// whether this is a message role or a dedicated field).
    pub system_prompt: Option<String>,
}

impl RequestOptions {
    /// An options value with nothing set; the provider uses its own
    /// defaults.
    pub fn new() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max-tokens cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A concrete LLM API, abstracted behind a uniform streaming contract.
///
/// Implementations own their own HTTP client/auth; the core never sees
/// provider-specific request/response shapes past this boundary.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// A short identifier for logging (`"openai"`, `"anthropic"`, ...).
    fn name(&self) -> &str;

    /// Start a streaming completion. The returned stream yields normalized
    /// [`LlmEvent`]s until [`LlmEvent::StreamEnd`] or
    /// [`LlmEvent::StreamError`].
    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, CoreError>;
}
