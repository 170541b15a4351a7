//! OpenAI-compatible chat completions provider (OpenAI, vLLM, Ollama, ...).

use async_trait::async_trait;
use config::LlmProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, FinishReason, LlmError, MessageRole, ToolCall,
    provider::{ChatProvider, ChatStream},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// A provider speaking the OpenAI chat completions protocol.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    name: String,
    api_key: Option<SecretString>,
    model_renames: Vec<(String, String)>,
}

impl OpenAiProvider {
    /// Creates a provider from its configuration.
    pub fn new(name: impl Into<String>, config: &LlmProviderConfig) -> Self {
        let base_url = config
            .base_url
            .as_ref()
            .map(|url| url.as_str().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string());

        let model_renames = config
            .models
            .iter()
            .filter_map(|(id, model)| model.rename.clone().map(|rename| (id.clone(), rename)))
            .collect();

        Self {
            client: Client::new(),
            base_url,
            name: name.into(),
            api_key: config.api_key.clone(),
            model_renames,
        }
    }

    fn resolve_model(&self, model: &str) -> String {
        self.model_renames
            .iter()
            .find(|(id, _)| id == model)
            .map(|(_, rename)| rename.clone())
            .unwrap_or_else(|| model.to_string())
    }

    fn build_request(&self, request: ChatRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: self.resolve_model(&request.model),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    r#type: "function",
                    function: WireFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &WireRequest) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(body);

        if let Some(key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }

        let response = builder
            .send()
            .await
            .map_err(|err| LlmError::ConnectionError(format!("request to {url} failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("{} API error ({status}): {error_text}", self.name);

            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationFailed(error_text),
                404 => LlmError::ModelNotFound(error_text),
                429 => LlmError::RateLimitExceeded(error_text),
                400 => LlmError::InvalidRequest(error_text),
                _ => LlmError::ProviderApiError {
                    status: status.as_u16(),
                    message: error_text,
                },
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|err| LlmError::StreamError(format!("malformed completion response: {err}")))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::StreamError("completion response has no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(WireToolCall::into_tool_call)
            .collect();

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let event_stream = response.bytes_stream().eventsource();
        let provider = self.name.clone();

        let chunk_stream = event_stream
            .scan(ToolCallAccumulator::default(), move |accumulator, event| {
                let item: Option<Result<ChatChunk, LlmError>> = match event {
                    Err(err) => {
                        log::warn!("SSE parsing error in {provider} stream: {err}");
                        None
                    }
                    Ok(event) if event.data == "[DONE]" => None,
                    Ok(event) => match serde_json::from_str::<WireStreamChunk>(&event.data) {
                        Ok(chunk) => accumulator.absorb(chunk),
                        Err(err) => {
                            log::warn!("failed to parse {provider} streaming chunk: {err}");
                            None
                        }
                    },
                };

                futures::future::ready(Some(item))
            })
            .filter_map(futures::future::ready);

        Ok(Box::pin(chunk_stream))
    }
}

/// Reassembles tool calls from their streamed fragments. The OpenAI
/// protocol spreads one call's id, name, and argument text across many
/// delta chunks addressed by index.
#[derive(Default)]
struct ToolCallAccumulator {
    partial: Vec<PartialToolCall>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, chunk: WireStreamChunk) -> Option<Result<ChatChunk, LlmError>> {
        let choice = chunk.choices.into_iter().next()?;

        for delta_call in choice.delta.tool_calls.unwrap_or_default() {
            let index = delta_call.index.unwrap_or(self.partial.len());

            while self.partial.len() <= index {
                self.partial.push(PartialToolCall::default());
            }

            let partial = &mut self.partial[index];
            if let Some(id) = delta_call.id {
                partial.id = id;
            }
            if let Some(function) = delta_call.function {
                if let Some(name) = function.name {
                    partial.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial.arguments.push_str(&arguments);
                }
            }
        }

        if let Some(finish_reason) = choice.finish_reason.as_deref() {
            let tool_calls = std::mem::take(&mut self.partial)
                .into_iter()
                .filter(|partial| !partial.name.is_empty())
                .map(PartialToolCall::finalize)
                .collect();

            return Some(Ok(ChatChunk::finished(parse_finish_reason(Some(finish_reason)), tool_calls)));
        }

        choice
            .delta
            .content
            .filter(|content| !content.is_empty())
            .map(|content| Ok(ChatChunk::text(content)))
    }
}

impl PartialToolCall {
    fn finalize(self) -> ToolCall {
        let arguments = serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments.clone()));

        ToolCall {
            id: if self.id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                self.id
            },
            name: self.name,
            arguments,
        }
    }
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

// --- wire types ----------------------------------------------------------

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };

        let tool_calls = (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    r#type: Some("function".to_string()),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });

        Self {
            role,
            content: message.content.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    function: WireFunctionCall,
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::String(self.function.arguments.clone()));

        ToolCall {
            id: self.id,
            name: self.function.name,
            arguments,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireDeltaToolCall>>,
}

#[derive(Deserialize)]
struct WireDeltaToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireDeltaFunction>,
}

#[derive(Deserialize)]
struct WireDeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stream_chunk(data: Value) -> WireStreamChunk {
        serde_json::from_value(data).unwrap()
    }

    #[test]
    fn text_deltas_pass_through() {
        let mut accumulator = ToolCallAccumulator::default();

        let chunk = stream_chunk(json!({
            "choices": [{"delta": {"content": "Hel"}}]
        }));

        let item = accumulator.absorb(chunk).unwrap().unwrap();
        assert_eq!(item.delta.as_deref(), Some("Hel"));
        assert!(!item.done);
    }

    #[test]
    fn fragmented_tool_calls_reassemble_on_finish() {
        let mut accumulator = ToolCallAccumulator::default();

        let fragments = [
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "get_weather", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"city\":"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"Paris\"}"}}
            ]}}]}),
        ];

        for fragment in fragments {
            assert!(accumulator.absorb(stream_chunk(fragment)).is_none());
        }

        let finish = stream_chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }));
        let item = accumulator.absorb(finish).unwrap().unwrap();

        assert!(item.done);
        assert_eq!(item.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(item.tool_calls.len(), 1);
        assert_eq!(item.tool_calls[0].id, "call_1");
        assert_eq!(item.tool_calls[0].name, "get_weather");
        assert_eq!(item.tool_calls[0].arguments, json!({"city": "Paris"}));
    }

    #[test]
    fn empty_deltas_are_skipped() {
        let mut accumulator = ToolCallAccumulator::default();

        let chunk = stream_chunk(json!({"choices": [{"delta": {"content": ""}}]}));
        assert!(accumulator.absorb(chunk).is_none());
    }

    #[test]
    fn unparseable_arguments_fall_back_to_string() {
        let partial = PartialToolCall {
            id: "call_1".into(),
            name: "broken".into(),
            arguments: "not json".into(),
        };

        let call = partial.finalize();
        assert_eq!(call.arguments, Value::String("not json".into()));
    }
}
