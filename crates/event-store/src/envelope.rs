use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted event record as it exists in an aggregate stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The aggregate type owning the stream.
    pub aggregate_type: String,
    /// The aggregate identifier.
    pub aggregate_id: String,
    /// One-based position inside the aggregate stream.
    pub sequence: u64,
    /// The event variant tag, taken from the payload's `type` field.
    pub event_type: String,
    /// Commit time.
    pub timestamp: Timestamp,
    /// The serialized event variant.
    pub payload: Value,
    /// Caller attribution for audit.
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Deserializes the payload into a concrete event type.
    pub fn decode<E: serde::de::DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Attribution attached to every committed event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// The authenticated user responsible for the mutation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Correlates events produced by one logical request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EventMetadata {
    /// Metadata attributed to a user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            correlation_id: None,
        }
    }

    /// Attaches a correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
