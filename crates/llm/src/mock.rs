//! A scripted provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    ChatChunk, ChatProvider, ChatRequest, ChatResponse, ChatStream, FinishReason, LlmError, ToolCall,
};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    /// Text streamed as individual chunks.
    pub text_chunks: Vec<String>,
    /// Tool calls delivered on the final chunk.
    pub tool_calls: Vec<ToolCall>,
    /// When set, the turn fails with this connection error instead.
    pub error: Option<String>,
}

impl MockTurn {
    /// A plain text turn split into the given chunks.
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            text_chunks: chunks.iter().map(|chunk| chunk.to_string()).collect(),
            ..Default::default()
        }
    }

    /// A turn requesting tool calls after optional text.
    pub fn tool_calls(chunks: &[&str], tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text_chunks: chunks.iter().map(|chunk| chunk.to_string()).collect(),
            tool_calls,
            error: None,
        }
    }

    /// A failing turn.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A provider that replays scripted turns and records every request.
#[derive(Default)]
pub struct MockProvider {
    turns: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// A provider scripted with the given turns, replayed in order.
    pub fn scripted(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Appends another scripted turn.
    pub fn push_turn(&self, turn: MockTurn) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
    }

    /// Every request the provider has seen, in order.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    fn next_turn(&self, request: ChatRequest) -> Result<MockTurn, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let turn = self
            .turns
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front())
            .unwrap_or_else(|| MockTurn::text(&["(no scripted turn)"]));

        match turn.error {
            Some(message) => Err(LlmError::ConnectionError(message)),
            None => Ok(turn),
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let turn = self.next_turn(request)?;
        let finish_reason = if turn.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        Ok(ChatResponse {
            content: turn.text_chunks.concat(),
            tool_calls: turn.tool_calls,
            finish_reason,
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let turn = self.next_turn(request)?;
        let finish_reason = if turn.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        let chunks: Vec<Result<ChatChunk, LlmError>> = turn
            .text_chunks
            .into_iter()
            .map(|chunk| Ok(ChatChunk::text(chunk)))
            .chain(std::iter::once(Ok(ChatChunk::finished(finish_reason, turn.tool_calls))))
            .collect();

        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "mock".into(),
            messages: vec![],
            tools: vec![],
            temperature: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn scripted_turns_replay_in_order() {
        let provider = MockProvider::scripted(vec![
            MockTurn::tool_calls(
                &[],
                vec![ToolCall {
                    id: "k1".into(),
                    name: "get_weather".into(),
                    arguments: json!({"city": "Paris"}),
                }],
            ),
            MockTurn::text(&["It is ", "cloudy."]),
        ]);

        let first = provider.chat(request()).await.unwrap();
        assert!(first.has_tool_calls());

        let second = provider.chat(request()).await.unwrap();
        assert_eq!(second.content, "It is cloudy.");
        assert_eq!(second.finish_reason, FinishReason::Stop);

        assert_eq!(provider.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn streamed_turn_ends_with_final_chunk() {
        let provider = MockProvider::scripted(vec![MockTurn::text(&["The ", "answer ", "is 4."])]);

        let chunks: Vec<_> = provider
            .chat_stream(request())
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;

        assert_eq!(chunks.len(), 4);
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn failure_turns_error() {
        let provider = MockProvider::scripted(vec![MockTurn::failure("backend down")]);
        assert!(provider.chat(request()).await.is_err());
    }
}
