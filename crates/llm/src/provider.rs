//! The provider abstraction and its implementations.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{ChatChunk, ChatRequest, ChatResponse, LlmError};

pub mod openai;

/// A stream of chat chunks from a provider.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>>;

/// Uniform chat interface over concrete LLM backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name as configured.
    fn name(&self) -> &str;

    /// One complete chat turn.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// One streamed chat turn. Tool calls arrive complete on the final
    /// chunk.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError>;
}
