//! Tool-call accumulation (C5): assembles `ToolCallStart` /
//! `ToolCallArgsDelta` / `ToolCallEnd` events into complete
//! [`crate::model::ToolCall`] values, grounded on the teacher's
//! `providers::openai::ToolCallAccumulator`.

use std::collections::HashMap;

use crate::events::LlmEvent;
use crate::model::ToolCall;

#[derive(Debug, Clone, Default)]
struct PendingCall {
    function_name: String,
    arguments: String,
}

/// Accumulates tool-call events for one in-flight LLM stream, keyed by
/// `call_id`. A single stream may interleave multiple concurrent tool
/// calls; this type tracks them independently and yields each as it
/// completes.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: HashMap<String, PendingCall>,
    order: Vec<String>,
}

impl ToolCallAccumulator {
    /// Start with no in-flight calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one [`LlmEvent`]. Returns the completed [`ToolCall`] when a
    /// `ToolCallEnd` is observed for a call that was actually started;
    /// other event variants (including non-tool-call ones) are ignored.
    pub fn observe(&mut self, event: &LlmEvent) -> Option<ToolCall> {
        match event {
            LlmEvent::ToolCallStart {
                call_id,
                function_name,
            } => {
                self.pending.insert(
                    call_id.clone(),
                    PendingCall {
                        function_name: function_name.clone(),
                        arguments: String::new(),
                    },
                );
                self.order.push(call_id.clone());
                None
            }
            LlmEvent::ToolCallArgsDelta { call_id, text } => {
                if let Some(call) = self.pending.get_mut(call_id) {
                    call.arguments.push_str(text);
                }
                None
            }
            LlmEvent::ToolCallEnd { call_id } => {
                let call = self.pending.remove(call_id)?;
                self.order.retain(|id| id != call_id);
                Some(ToolCall {
                    call_id: call_id.clone(),
                    function_name: call.function_name,
                    arguments: call.arguments,
                })
            }
            _ => None,
        }
    }

    /// Whether any tool call is currently mid-stream.
    pub fn has_active_calls(&self) -> bool {
        !self.pending.is_empty()
    }
}
