//! Conversation agent loop configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Bounds for the reason/act loop driving a single user turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Number of conversation messages retained when building LLM context.
    /// The system prompt is always retained on top of this budget.
    pub max_context_messages: usize,
    /// Cap on reason/act iterations per user turn.
    pub max_iterations: usize,
    /// Cap on tool calls executed out of a single LLM response.
    pub max_tool_calls_per_iteration: usize,
    /// Halt the turn on the first failed tool execution.
    pub stop_on_error: bool,
    /// Wall-clock budget for one user turn.
    #[serde(deserialize_with = "deserialize_duration")]
    pub turn_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 50,
            max_iterations: 10,
            max_tool_calls_per_iteration: 5,
            stop_on_error: false,
            turn_timeout: Duration::from_secs(120),
        }
    }
}
