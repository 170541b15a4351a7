//! Uniform streaming and non-streaming chat with tool calls across
//! OpenAI-compatible backends.
//!
//! The conversation runtime talks to [`ChatProvider`] and the
//! [`ProviderRegistry`]; concrete protocols live under `provider`.

mod error;
mod messages;
mod mock;
mod provider;
mod registry;

pub use error::LlmError;
pub use messages::{ChatChunk, ChatMessage, ChatRequest, ChatResponse, FinishReason, MessageRole, ToolCall, ToolSpec};
pub use mock::{MockProvider, MockTurn};
pub use provider::{ChatProvider, ChatStream, openai::OpenAiProvider};
pub use registry::ProviderRegistry;
