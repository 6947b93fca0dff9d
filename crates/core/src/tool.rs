//! Tool call and tool result value objects.
//!
//! Invariant: every tool call the model emits in a step must eventually be
//! answered by exactly one matching result before the step counts as done.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageToolCall};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID within the step (the provider's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl From<MessageToolCall> for ToolCall {
    fn from(call: MessageToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// The answer to one tool call: either a result payload or an error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call this result answers
    pub tool_call_id: String,

    /// The tool's output, when it succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// The failure description, when it did not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(tool_call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// A failed result, reported back to the model as text so it can recover.
    pub fn err(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Render this result as a tool message for the conversation.
    pub fn into_message(self) -> Message {
        let content = match (&self.result, &self.error) {
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => format!("Error: {error}"),
            (None, None) => String::new(),
        };
        Message::tool_result(self.tool_call_id, content)
    }
}
