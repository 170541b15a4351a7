use thiserror::Error;

/// Errors surfaced by the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The aggregate has no events in the store.
    #[error("Aggregate '{aggregate_type}/{aggregate_id}' not found")]
    NotFound {
        /// The aggregate type the stream belongs to.
        aggregate_type: &'static str,
        /// The aggregate identifier.
        aggregate_id: String,
    },

    /// The optimistic concurrency check failed; the caller holds stale state
    /// and must reload before retrying.
    #[error("Concurrency conflict on '{stream}': expected version {expected}, stream is at {actual}")]
    ConcurrencyConflict {
        /// The stream key the append targeted.
        stream: String,
        /// The version the writer expected.
        expected: u64,
        /// The version actually found in the store.
        actual: u64,
    },

    /// An event payload could not be serialized or deserialized.
    #[error("Event codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the caller may retry the operation with refreshed state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}
