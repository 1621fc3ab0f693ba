// pwnai-core/src/models/tools.rs
use super::chat::{ChatMessage, MessagePart, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

/// Metadata for a tool as presented to the model and to logs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Short `family:action` label used in log lines.
    pub log_name: String,
    pub input_schema: Value,
    #[serde(default)]
    pub strict: bool,
}

/// Builds an object schema that rejects unknown properties.
pub fn object_schema(properties: Vec<(&str, Value)>, required: &[&str]) -> Value {
    let props_map: Map<String, Value> = properties
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    json!({
        "type": "object",
        "properties": props_map,
        "required": required,
        "additionalProperties": false
    })
}

/// Per-invocation context handed to verifiers, executors and describers.
#[derive(Debug, Clone, Default)]
pub struct ToolUseContext {
    pub chat_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Fires when the caller abandons the turn.
    pub cancel: CancellationToken,
}

impl ToolUseContext {
    pub fn new(chat_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            chat_id: chat_id.into(),
            cancel,
            ..Default::default()
        }
    }

    pub fn for_call(&self, tool_call_id: &str, tool_name: &str) -> Self {
        Self {
            chat_id: self.chat_id.clone(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            cancel: self.cancel.clone(),
        }
    }
}

/// How a single tool call ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolExecutionStatus {
    Success,
    Failure,
    Denied,
}

/// Result of one tool call, ready to be fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Provider-assigned id of the call, echoed unchanged.
    pub tool_call_id: String,
    pub tool_name: String,
    /// Raw input as received (or the raw text wrapped in a string when it was not JSON).
    pub input: Value,
    /// Tool output, or the error text for failures and denials.
    pub output: String,
    pub status: ToolExecutionStatus,
    /// One-line human readable summary of the call.
    pub description: String,
}

impl ToolExecutionResult {
    pub fn is_error(&self) -> bool {
        self.status != ToolExecutionStatus::Success
    }

    /// Tool-role message carrying this result back to the provider.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::with_parts(
            Role::Tool,
            vec![MessagePart::ToolResult {
                tool_use_id: self.tool_call_id.clone(),
                content: self.output.clone(),
                is_error: self.is_error(),
            }],
        )
    }
}
