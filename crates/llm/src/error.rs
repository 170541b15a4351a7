use thiserror::Error;

/// LLM provider errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The model id does not use the `provider/model` form.
    #[error("Invalid model format: expected 'provider/model', got '{0}'")]
    InvalidModelFormat(String),

    /// Provider not found in configuration.
    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    /// Model not known to the provider.
    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    /// Authentication failed (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded at the provider.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Provider API returned an error.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream error message.
        message: String,
    },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The stream ended or decoded incorrectly mid-response.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Unexpected internal fault.
    #[error("Internal provider error: {0}")]
    InternalError(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimitExceeded(_) | LlmError::ConnectionError(_) | LlmError::StreamError(_) => true,
            LlmError::ProviderApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
