use event_store::StoreError;
use thiserror::Error;

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The addressed source, tool, group, or policy does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// The resource kind.
        kind: &'static str,
        /// The requested identifier.
        id: String,
    },

    /// A command carried invalid input.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// Fetching or parsing a source descriptor failed.
    #[error("Failed to ingest inventory for source '{source_id}': {message}")]
    Ingestion {
        /// The source being refreshed.
        source_id: String,
        /// Why ingestion failed.
        message: String,
    },

    /// Event store failure, including concurrency conflicts that the caller
    /// retries with refreshed state.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
