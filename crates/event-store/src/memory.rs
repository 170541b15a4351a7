use async_trait::async_trait;
use dashmap::DashMap;
use jiff::Timestamp;

use crate::{EventEnvelope, NewEvent, StoreError, StreamBackend, StreamKey};

/// In-process stream storage.
///
/// Streams live in a concurrent map keyed by `{type}/{id}`; the per-entry
/// shard lock makes each append atomic for its stream. Suitable for
/// development, tests, and single-replica deployments.
#[derive(Default)]
pub struct InMemoryBackend {
    streams: DashMap<String, Vec<EventEnvelope>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamBackend for InMemoryBackend {
    async fn append(
        &self,
        stream: &StreamKey,
        prior_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        let mut entry = self.streams.entry(stream.to_string()).or_default();

        let actual = entry.len() as u64;
        if actual != prior_version {
            return Err(StoreError::ConcurrencyConflict {
                stream: stream.to_string(),
                expected: prior_version,
                actual,
            });
        }

        let now = Timestamp::now();
        let mut committed = Vec::with_capacity(events.len());

        for (offset, event) in events.into_iter().enumerate() {
            let envelope = EventEnvelope {
                aggregate_type: stream.aggregate_type.to_string(),
                aggregate_id: stream.aggregate_id.clone(),
                sequence: prior_version + offset as u64 + 1,
                event_type: event.event_type,
                timestamp: now,
                payload: event.payload,
                metadata: event.metadata,
            };
            entry.push(envelope.clone());
            committed.push(envelope);
        }

        Ok(committed)
    }

    async fn read(&self, stream: &StreamKey) -> Result<Vec<EventEnvelope>, StoreError> {
        Ok(self
            .streams
            .get(&stream.to_string())
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn version(&self, stream: &StreamKey) -> Result<u64, StoreError> {
        Ok(self
            .streams
            .get(&stream.to_string())
            .map(|entry| entry.len() as u64)
            .unwrap_or(0))
    }
}
