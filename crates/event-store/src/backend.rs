use async_trait::async_trait;
use serde_json::Value;

use crate::{EventEnvelope, EventMetadata, StoreError};

/// Identifies one aggregate stream: `{aggregate_type}/{aggregate_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// The aggregate type namespace.
    pub aggregate_type: &'static str,
    /// The aggregate identifier.
    pub aggregate_id: String,
}

impl StreamKey {
    /// Builds a stream key.
    pub fn new(aggregate_type: &'static str, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type,
            aggregate_id: aggregate_id.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

/// A not-yet-committed event: the serialized payload plus its variant tag.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// The event variant tag.
    pub event_type: String,
    /// The serialized event.
    pub payload: Value,
    /// Caller attribution.
    pub metadata: EventMetadata,
}

/// Storage for aggregate event streams.
///
/// Implementations must make `append` atomic per stream: either the whole
/// batch commits at consecutive sequences, or nothing does. The optimistic
/// check compares `prior_version` against the stream's current length.
#[async_trait]
pub trait StreamBackend: Send + Sync + 'static {
    /// Appends a batch, failing with [`StoreError::ConcurrencyConflict`]
    /// when `prior_version` does not match the stream head.
    async fn append(
        &self,
        stream: &StreamKey,
        prior_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>, StoreError>;

    /// Reads the full stream in sequence order. An unknown stream reads as
    /// empty.
    async fn read(&self, stream: &StreamKey) -> Result<Vec<EventEnvelope>, StoreError>;

    /// The current version (event count) of the stream.
    async fn version(&self, stream: &StreamKey) -> Result<u64, StoreError>;
}
