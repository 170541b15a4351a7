//! Wire-level events streamed to the client.

use serde::Serialize;
use serde_json::{Value, json};

/// Client-bound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WireEventType {
    /// First event of every stream.
    StreamStarted,
    /// Incremental assistant text.
    ContentChunk,
    /// An assistant message finished.
    ContentComplete,
    /// A tool call began executing.
    ToolCallStarted,
    /// A tool call finished.
    ToolCallCompleted,
    /// A widget must be rendered.
    WidgetRender,
    /// A widget response was accepted.
    WidgetResponseAck,
    /// A template item became current.
    ItemContext,
    /// A proactive flow began.
    FlowStarted,
    /// A proactive flow finished.
    FlowCompleted,
    /// Free chat input toggled.
    ChatInputEnabled,
    /// Non-fatal notice, e.g. the iteration cap was reached.
    Notice,
    /// The turn failed.
    Error,
    /// The turn was cancelled.
    Cancelled,
}

/// One sequence-numbered event on the client channel.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    /// Event kind, determining the payload shape.
    pub r#type: WireEventType,
    /// Position in the per-connection stream.
    pub sequence: u64,
    /// The conversation this stream serves.
    pub conversation_id: String,
    /// The message the event refers to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// The reason/act iteration, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    /// Type-specific payload.
    pub payload: Value,
}

impl WireEvent {
    fn new(r#type: WireEventType, conversation_id: &str, payload: Value) -> Self {
        Self {
            r#type,
            sequence: 0,
            conversation_id: conversation_id.to_string(),
            message_id: None,
            iteration: None,
            payload,
        }
    }

    fn with_message(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    /// Tags the event with its reason/act iteration.
    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// The opening event carrying the session request id.
    pub fn stream_started(conversation_id: &str, request_id: &str) -> Self {
        Self::new(
            WireEventType::StreamStarted,
            conversation_id,
            json!({ "request_id": request_id }),
        )
    }

    /// An incremental text delta for a message.
    pub fn content_chunk(conversation_id: &str, message_id: &str, delta: &str) -> Self {
        Self::new(WireEventType::ContentChunk, conversation_id, json!({ "delta": delta })).with_message(message_id)
    }

    /// A message finished streaming.
    pub fn content_complete(conversation_id: &str, message_id: &str, full: &str) -> Self {
        Self::new(WireEventType::ContentComplete, conversation_id, json!({ "full": full })).with_message(message_id)
    }

    /// A tool call began.
    pub fn tool_call_started(conversation_id: &str, call_id: &str, name: &str, args: &Value) -> Self {
        Self::new(
            WireEventType::ToolCallStarted,
            conversation_id,
            json!({ "call_id": call_id, "name": name, "args": args }),
        )
    }

    /// A tool call finished.
    pub fn tool_call_completed(
        conversation_id: &str,
        call_id: &str,
        success: bool,
        result: &Value,
        error: Option<&str>,
    ) -> Self {
        Self::new(
            WireEventType::ToolCallCompleted,
            conversation_id,
            json!({ "call_id": call_id, "success": success, "result": result, "error": error }),
        )
    }

    /// A widget render instruction. The props must already be client-safe.
    pub fn widget_render(conversation_id: &str, widget_id: &str, widget_type: &str, props: Value) -> Self {
        Self::new(
            WireEventType::WidgetRender,
            conversation_id,
            json!({ "widget_id": widget_id, "widget_type": widget_type, "props": props }),
        )
    }

    /// A widget response was accepted.
    pub fn widget_response_ack(conversation_id: &str, widget_id: &str) -> Self {
        Self::new(
            WireEventType::WidgetResponseAck,
            conversation_id,
            json!({ "widget_id": widget_id }),
        )
    }

    /// A template item became current.
    pub fn item_context(conversation_id: &str, index: usize, total: usize, title: Option<&str>) -> Self {
        Self::new(
            WireEventType::ItemContext,
            conversation_id,
            json!({ "index": index, "total": total, "title": title }),
        )
    }

    /// A proactive flow began.
    pub fn flow_started(conversation_id: &str, template_id: &str) -> Self {
        Self::new(
            WireEventType::FlowStarted,
            conversation_id,
            json!({ "template_id": template_id }),
        )
    }

    /// A proactive flow finished.
    pub fn flow_completed(conversation_id: &str, score_report: Option<Value>) -> Self {
        Self::new(
            WireEventType::FlowCompleted,
            conversation_id,
            json!({ "score_report": score_report }),
        )
    }

    /// Free chat input toggled.
    pub fn chat_input_enabled(conversation_id: &str, enabled: bool) -> Self {
        Self::new(
            WireEventType::ChatInputEnabled,
            conversation_id,
            json!({ "enabled": enabled }),
        )
    }

    /// The iteration cap was reached and the turn finalized early.
    pub fn max_iterations_reached(conversation_id: &str, iterations: usize) -> Self {
        Self::new(
            WireEventType::Notice,
            conversation_id,
            json!({ "kind": "max_iterations_reached", "iterations": iterations }),
        )
    }

    /// The turn failed.
    pub fn error(conversation_id: &str, kind: &str, message: &str, retryable: bool) -> Self {
        Self::new(
            WireEventType::Error,
            conversation_id,
            json!({ "kind": kind, "message": message, "retryable": retryable }),
        )
    }

    /// The turn was cancelled.
    pub fn cancelled(conversation_id: &str, request_id: &str) -> Self {
        Self::new(
            WireEventType::Cancelled,
            conversation_id,
            json!({ "request_id": request_id }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_types() {
        let event = WireEvent::content_chunk("c1", "m1", "The ");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "content_chunk");
        assert_eq!(value["conversation_id"], "c1");
        assert_eq!(value["message_id"], "m1");
        assert_eq!(value["payload"]["delta"], "The ");
        assert!(value.get("iteration").is_none());
    }

    #[test]
    fn tool_events_carry_call_ids() {
        let started = WireEvent::tool_call_started("c1", "k1", "get_weather", &serde_json::json!({"city": "Paris"}));
        assert_eq!(started.payload["call_id"], "k1");

        let completed = WireEvent::tool_call_completed("c1", "k1", true, &serde_json::json!({"t": 15}), None);
        assert_eq!(completed.payload["success"], true);
    }
}
