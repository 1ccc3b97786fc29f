use serde::Serialize;
use serde_json::Value;

/// Incremental output of a run, streamed to the caller's sink in the
/// order it happens.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A chunk of assistant text, emitted as soon as it is available.
    Text { text: String },
    /// A tool invocation is about to be dispatched.
    ToolCall { full_name: String, input: Value },
    /// The invocation finished, successfully or not.
    ToolResult {
        full_name: String,
        success: bool,
        content: Value,
    },
}
