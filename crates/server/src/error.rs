//! Control-plane error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use catalog::CatalogError;
use event_store::StoreError;
use executor::ExecutorError;
use orchestrator::OrchestratorError;
use serde::Serialize;

/// A control-plane error: machine-readable kind, human message, and a
/// retryability hint, rendered with the matching HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    retryable: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "caller token missing or invalid")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            kind: self.kind.to_string(),
            message: self.message,
            retryable: self.retryable,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match &err {
            CatalogError::NotFound { .. } => Self::not_found(err.to_string()),
            CatalogError::Validation { .. } => Self::bad_request(err.to_string()),
            CatalogError::Ingestion { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, "upstream_error", err.to_string()).retryable()
            }
            CatalogError::Store(store) if store.is_conflict() => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string()).retryable()
            }
            CatalogError::Store(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::NotFound { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidState { .. } => StatusCode::CONFLICT,
            OrchestratorError::Validation { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::Forbidden(_) => StatusCode::FORBIDDEN,
            OrchestratorError::Llm(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::Store(store) if store.is_conflict() => StatusCode::CONFLICT,
            OrchestratorError::Store(_) | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Cancelled => StatusCode::CONFLICT,
            OrchestratorError::TurnTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };

        let retryable = err.is_retryable();
        let mut api = Self::new(status, err.kind(), err.to_string());
        if retryable {
            api = api.retryable();
        }
        api
    }
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        let (status, kind) = match &err {
            ExecutorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ExecutorError::Disabled(_) => (StatusCode::NOT_FOUND, "disabled"),
            ExecutorError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ExecutorError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            ExecutorError::TokenExchange { .. } => (StatusCode::BAD_GATEWAY, "token_exchange_failed"),
            ExecutorError::Timeout(..) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ExecutorError::Transport { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ExecutorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let retryable = err.is_retryable();
        let mut api = Self::new(status, kind, err.to_string());
        if retryable {
            api = api.retryable();
        }
        api
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            Self::new(StatusCode::CONFLICT, "conflict", err.to_string()).retryable()
        } else {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
        }
    }
}
