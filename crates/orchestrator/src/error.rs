use event_store::StoreError;
use thiserror::Error;

use crate::SessionPhase;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A conversation, definition, template, or session is absent.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// The requested action is not legal in the session's current phase.
    #[error("Invalid state: cannot {action} while {phase:?}")]
    InvalidState {
        /// The attempted action.
        action: &'static str,
        /// The phase the session was in.
        phase: SessionPhase,
    },

    /// A request carried invalid input.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// The caller is authenticated but may not use this agent definition.
    #[error("Access to agent definition '{0}' is denied")]
    Forbidden(String),

    /// The language model provider failed.
    #[error(transparent)]
    Llm(#[from] llm::LlmError),

    /// Event store failure, including concurrency conflicts.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session-scoped cancellation flag was set.
    #[error("Turn cancelled")]
    Cancelled,

    /// The turn exceeded its wall-clock budget.
    #[error("Turn exceeded its {0:?} budget")]
    TurnTimeout(std::time::Duration),

    /// Unexpected internal fault.
    #[error("Internal orchestrator error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Short machine-readable kind for wire error events.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::InvalidState { .. } => "invalid_state",
            OrchestratorError::Validation { .. } => "validation_error",
            OrchestratorError::Forbidden(_) => "forbidden",
            OrchestratorError::Llm(_) => "llm_error",
            OrchestratorError::Store(err) if err.is_conflict() => "conflict",
            OrchestratorError::Store(_) => "store_error",
            OrchestratorError::Cancelled => "cancelled",
            OrchestratorError::TurnTimeout(_) => "timeout",
            OrchestratorError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Store(err) => err.is_conflict(),
            OrchestratorError::Llm(err) => err.is_retryable(),
            OrchestratorError::TurnTimeout(_) => true,
            _ => false,
        }
    }
}
