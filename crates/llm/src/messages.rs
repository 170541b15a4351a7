//! Unified chat types shared by every provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The system prompt.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// A tool result fed back to the model.
    Tool,
}

/// One message in the model's context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: MessageRole,
    /// Text content. Empty for pure tool-call messages.
    pub content: String,
    /// Tool calls the assistant requested in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool-role messages, the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant message, optionally carrying tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// A tool-result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back on the result message.
    pub id: String,
    /// Tool name as presented to the model.
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: Value,
}

/// A tool the model may call, in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name as presented to the model.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON-Schema parameters object.
    pub parameters: Value,
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Provider-local model name.
    pub model: String,
    /// Context messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tools available this turn.
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Output token cap.
    pub max_tokens: Option<u32>,
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// The model wants tool results before continuing.
    ToolCalls,
    /// Output token cap reached.
    Length,
    /// Provider-specific or unknown reason.
    Other,
}

/// A complete (non-streamed) chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text.
    pub content: String,
    /// Requested tool calls, empty for final answers.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    /// Whether the response requests tool execution.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One increment of a streamed chat response.
///
/// Text arrives in `delta` across many chunks; tool calls are accumulated
/// by the provider and delivered complete on the final chunk.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    /// Incremental assistant text.
    pub delta: Option<String>,
    /// Set on the final chunk of the response.
    pub done: bool,
    /// Complete tool calls, present only on the final chunk.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped, present only on the final chunk.
    pub finish_reason: Option<FinishReason>,
}

impl ChatChunk {
    /// A text-only chunk.
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Default::default()
        }
    }

    /// A terminal chunk.
    pub fn finished(finish_reason: FinishReason, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            delta: None,
            done: true,
            tool_calls,
            finish_reason: Some(finish_reason),
        }
    }
}
