use catalog::ToolId;
use serde::Serialize;
use serde_json::Value;

/// Terminal status of one tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The upstream accepted the call and returned a success result.
    Completed,
    /// The upstream returned an error status or the dispatch failed.
    Failed,
}

/// Unified result of one tool execution, fed back to the agent loop and
/// returned on the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// The executed tool.
    pub tool_id: ToolId,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Parsed upstream result for completed calls, and whatever error body
    /// the upstream produced for failed ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error description for failed calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Numeric HTTP status for HTTP dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    /// Wall-clock dispatch time.
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// Whether the call completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}
