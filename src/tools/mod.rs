//! Tool registry contract (§6) and tool-name sanitisation (C5, §4.5).
//!
//! Built-in tool implementations and the registry's own storage are out of
//! scope for this crate (`spec.md` §1 Non-goals): a host supplies its own
//! [`ToolRegistry`] implementation; the core only ever calls through the
//! trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One tool exposed to the LLM, in the shape its provider expects.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    /// Tool name, already sanitised (see [`sanitize_tool_name`]).
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON-schema object describing the tool's arguments.
    pub parameters: Value,
}

/// A single tool invocation requested by the LLM.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Sanitised tool name.
    pub tool_name: String,
    /// JSON-encoded argument string, as received from the LLM driver.
    pub arguments: String,
    /// The session this invocation belongs to.
    pub session_id: String,
    /// Opaque caller context forwarded verbatim (auth, tenant, etc.).
    pub call_context: Value,
}

/// The result of executing one [`ToolInvocation`].
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Whether the tool call succeeded.
    pub success: bool,
    /// JSON-encoded result payload, present on success.
    pub result: Option<String>,
    /// Human-readable failure description, present on failure.
    pub error: Option<String>,
    /// Execution latency, milliseconds.
    pub latency_ms: u64,
}

/// A host-supplied collection of callable tools.
///
/// Assumed externally thread-safe (§5); each invocation is a one-shot call
/// the orchestrator bounds with its own per-tool timeout, so implementations
/// need not enforce a timeout themselves.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// All tool definitions currently available, already in the shape the
    /// LLM provider expects.
    fn get_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one tool call.
    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutcome>;
}

/// Sanitise a tool name for providers that impose name constraints
/// (`spec.md` §4.5): replace characters outside `[A-Za-z0-9_.:-]` with `_`;
/// ensure the first character is a letter or underscore; truncate to 64
/// characters.
///
/// Deduplication across a whole tool set ("first wins") is the caller's
/// responsibility — see [`dedupe_by_sanitized_name`].
pub fn sanitize_tool_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized
        .chars()
        .next()
        .is_some_and(|c| !c.is_ascii_alphabetic() && c != '_')
    {
        sanitized.insert(0, '_');
    }
    if sanitized.is_empty() {
        sanitized.push('_');
    }

    sanitized.chars().take(64).collect()
}

/// Sanitise and deduplicate a set of tool definitions by their sanitised
/// name, keeping the first occurrence (`spec.md` §4.5).
pub fn dedupe_by_sanitized_name(definitions: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(definitions.len());
    for mut def in definitions {
        def.name = sanitize_tool_name(&def.name);
        if seen.insert(def.name.clone()) {
            out.push(def);
        }
    }
    out
}
