//! Reference HTTP provider adapter: an OpenAI-Chat-Completions-shaped
//! streaming client, grounded directly on the teacher's
//! `providers::openai::OpenAiAdapter`.
//!
//! Hosts targeting a different wire format implement [`ProviderAdapter`]
//! directly; this adapter exists so the crate ships at least one concrete,
//! runnable implementation.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::CoreError;
use crate::events::{LlmEvent, TokenUsage};
use crate::llm::provider::{LlmEventStream, ProviderAdapter, RequestOptions};
use crate::llm::providers::sse::SseLineParser;
use crate::model::{Message, MessageContent, Role};
use crate::tools::ToolDefinition;

/// Configuration for the HTTP chat-completions adapter.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Bearer token for the `Authorization` header.
    pub api_key: String,
    /// Base URL, e.g. `https://api.openai.com`.
    pub base_url: String,
    /// Model identifier sent in the request body.
    pub model: String,
}

impl HttpProviderConfig {
    /// Build a config for the given key and model, defaulting to the
    /// OpenAI-compatible base URL.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_owned(),
            model: model.into(),
        }
    }

    /// Override the base URL (for OpenAI-compatible third-party endpoints).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Tracks in-flight tool calls during streaming, keyed by the provider's
/// chunk index (not `call_id`, which may arrive only on the first chunk).
#[derive(Debug, Default)]
struct IndexedToolCallTracker {
    active: HashMap<u64, (String, bool)>,
}

impl IndexedToolCallTracker {
    fn process_chunk(
        &mut self,
        index: u64,
        id: Option<&str>,
        function_name: Option<&str>,
        args_fragment: Option<&str>,
    ) -> Vec<LlmEvent> {
        let mut events = Vec::new();
        let entry = self.active.entry(index).or_insert_with(|| (String::new(), false));
        if let Some(id) = id.filter(|v| !v.is_empty()) {
            entry.0 = id.to_owned();
        }
        if !entry.1 && !entry.0.is_empty() {
            entry.1 = true;
            events.push(LlmEvent::ToolCallStart {
                call_id: entry.0.clone(),
                function_name: function_name.unwrap_or_default().to_owned(),
            });
        }
        if let Some(args) = args_fragment.filter(|v| !v.is_empty()) {
            events.push(LlmEvent::ToolCallArgsDelta {
                call_id: entry.0.clone(),
                text: args.to_owned(),
            });
        }
        events
    }

    fn finish_all(&mut self) -> Vec<LlmEvent> {
        let mut indices: Vec<u64> = self.active.keys().copied().collect();
        indices.sort_unstable();
        let mut events = Vec::new();
        for idx in indices {
            if let Some((call_id, started)) = self.active.get(&idx) {
                if *started {
                    events.push(LlmEvent::ToolCallEnd {
                        call_id: call_id.clone(),
                    });
                }
            }
        }
        self.active.clear();
        events
    }
}

fn message_to_json(message: &Message) -> serde_json::Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    match &message.content {
        MessageContent::Text { text } => {
            let mut body = serde_json::json!({ "role": role, "content": text });
            if !message.tool_calls.is_empty()
                && let Some(obj) = body.as_object_mut()
            {
                let calls: Vec<serde_json::Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        serde_json::json!({
                            "id": call.call_id,
                            "type": "function",
                            "function": {
                                "name": call.function_name,
                                "arguments": call.arguments,
                            },
                        })
                    })
                    .collect();
                obj.insert("tool_calls".to_owned(), serde_json::json!(calls));
            }
            body
        }
        MessageContent::ToolResult { call_id, content } => serde_json::json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

fn tools_to_json(tools: &[ToolDefinition]) -> serde_json::Value {
    serde_json::json!(
        tools
            .iter()
            .map(|tool| serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            }))
            .collect::<Vec<_>>()
    )
}

/// Build the chat-completions request body.
pub fn build_request(
    model: &str,
    messages: &[Message],
    options: &RequestOptions,
    tools: &[ToolDefinition],
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
        "stream": true,
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(system_prompt) = &options.system_prompt
            && !system_prompt.is_empty()
        {
            let mut with_system = vec![serde_json::json!({ "role": "system", "content": system_prompt })];
            if let Some(existing) = obj.get("messages").and_then(|v| v.as_array()) {
                with_system.extend(existing.iter().cloned());
            }
            obj.insert("messages".to_owned(), serde_json::json!(with_system));
        }
        if let Some(max_tokens) = options.max_tokens {
            obj.insert("max_tokens".to_owned(), serde_json::json!(max_tokens));
        }
        if let Some(temperature) = options.temperature {
            obj.insert("temperature".to_owned(), serde_json::json!(temperature));
        }
        if !tools.is_empty() {
            obj.insert("tools".to_owned(), tools_to_json(tools));
        }
    }
    body
}

/// Parse one SSE `data:` payload into normalized events.
pub fn parse_chunk(data: &str, tracker: &mut IndexedToolCallTracker) -> Vec<LlmEvent> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) else {
        return Vec::new();
    };
    let mut events = Vec::new();
    let Some(choices) = parsed.get("choices").and_then(|c| c.as_array()) else {
        return events;
    };
    for choice in choices {
        let Some(delta) = choice.get("delta") else {
            continue;
        };
        if let Some(text) = delta.get("content").and_then(|c| c.as_str())
            && !text.is_empty()
        {
            events.push(LlmEvent::TextDelta { text: text.to_owned() });
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
            for tc in tool_calls {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let id = tc.get("id").and_then(|v| v.as_str());
                let function = tc.get("function");
                let function_name = function.and_then(|f| f.get("name")).and_then(|v| v.as_str());
                let args = function.and_then(|f| f.get("arguments")).and_then(|v| v.as_str());
                events.extend(tracker.process_chunk(index, id, function_name, args));
            }
        }
        if let Some(finish_reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            if finish_reason == "tool_calls" {
                events.extend(tracker.finish_all());
            }
            let usage = parsed.get("usage").map(|u| TokenUsage {
                prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                cached_content_tokens: u
                    .get("prompt_tokens_details")
                    .and_then(|d| d.get("cached_tokens"))
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32),
            });
            events.push(LlmEvent::StreamEnd { usage });
        }
    }
    events
}

/// An OpenAI-Chat-Completions-shaped streaming adapter.
pub struct HttpProviderAdapter {
    config: HttpProviderConfig,
    client: reqwest::Client,
}

impl HttpProviderAdapter {
    /// Build an adapter with a fresh `reqwest::Client`.
    pub fn new(config: HttpProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, CoreError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let body = build_request(&self.config.model, messages, options, tools);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| CoreError::Llm(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Llm(format!("HTTP {}: {body_text}", status.as_u16())));
        }

        Ok(Box::pin(event_stream(response.bytes_stream())))
    }
}

fn event_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = LlmEvent> + Send {
    futures_util::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            parser: SseLineParser::new(),
            tracker: IndexedToolCallTracker::default(),
            started: false,
            buffered: Vec::new(),
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.buffered.pop() {
                    return Some((event, state));
                }
                if !state.started {
                    state.started = true;
                    return Some((LlmEvent::StreamStart, state));
                }
                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        for sse in state.parser.push(&chunk) {
                            if sse.is_done() {
                                continue;
                            }
                            let events = parse_chunk(&sse.data, &mut state.tracker);
                            state.buffered.extend(events.into_iter().rev());
                        }
                    }
                    Some(Err(err)) => {
                        return Some((
                            LlmEvent::StreamError {
                                message: format!("stream read error: {err}"),
                            },
                            state,
                        ));
                    }
                    None => {
                        if let Some(sse) = state.parser.flush()
                            && !sse.is_done()
                        {
                            let events = parse_chunk(&sse.data, &mut state.tracker);
                            state.buffered.extend(events.into_iter().rev());
                            continue;
                        }
                        return None;
                    }
                }
            }
        },
    )
}

struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    parser: SseLineParser,
    tracker: IndexedToolCallTracker,
    started: bool,
    buffered: Vec<LlmEvent>,
}
