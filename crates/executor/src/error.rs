use thiserror::Error;

/// Errors surfaced by the execution pipeline.
///
/// Dispatch failures against a reachable upstream are not errors: they shape
/// into a failed [`crate::ExecutionOutcome`] so the agent loop can feed them
/// back to the model. These variants cover everything that prevents a
/// dispatch from happening at all.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The tool id is unknown to the catalog.
    #[error("Tool '{0}' not found")]
    NotFound(String),

    /// The tool or its source is disabled or no longer active.
    #[error("Tool '{0}' is disabled")]
    Disabled(String),

    /// The caller is authenticated but the access policies deny the tool.
    #[error("Access to tool '{0}' is denied")]
    Forbidden(String),

    /// Arguments failed schema validation.
    #[error("Invalid arguments at '{pointer}': {message}")]
    Validation {
        /// JSON pointer to the failing argument.
        pointer: String,
        /// Why it failed.
        message: String,
    },

    /// The identity provider rejected or failed the token exchange.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Provider or transport error description.
        message: String,
        /// Whether a retry with the same inputs may succeed.
        retryable: bool,
    },

    /// The dispatch exceeded its timeout budget.
    #[error("Tool '{0}' timed out after {1:?}")]
    Timeout(String, std::time::Duration),

    /// The plugin transport is unavailable and could not be reconnected.
    #[error("Plugin transport for source '{source_id}' failed: {message}")]
    Transport {
        /// The source whose transport failed.
        source_id: String,
        /// Why.
        message: String,
    },

    /// Unexpected internal fault.
    #[error("Internal executor error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::TokenExchange { retryable, .. } => *retryable,
            ExecutorError::Timeout(..) | ExecutorError::Transport { .. } => true,
            _ => false,
        }
    }
}
