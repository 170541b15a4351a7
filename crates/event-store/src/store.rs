use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};

use crate::{Aggregate, EventEnvelope, EventMetadata, NewEvent, StoreError, StreamBackend, StreamKey, Versioned};

const BUS_CAPACITY: usize = 1024;

/// The event store: load by replay, commit with an optimistic check,
/// publish committed envelopes on a broadcast bus.
///
/// In-process writers to one aggregate serialize on a logical per-stream
/// lock held for the load→execute→commit window; concurrent writers in
/// other processes are caught by the backend's `prior_version` check.
pub struct EventStore {
    backend: Arc<dyn StreamBackend>,
    bus: broadcast::Sender<EventEnvelope>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EventStore {
    /// Creates a store over the given backend.
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);

        Self {
            backend,
            bus,
            locks: DashMap::new(),
        }
    }

    /// Subscribes to committed events across all aggregates. A slow
    /// subscriber that lags past the bus capacity observes a `Lagged` error
    /// and must recompute from aggregates.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Acquires the in-process writer lock for one aggregate. Hold the
    /// guard across load→execute→commit.
    pub async fn lock_aggregate<A: Aggregate>(&self, aggregate_id: &str) -> OwnedMutexGuard<()> {
        let key = StreamKey::new(A::AGGREGATE_TYPE, aggregate_id).to_string();
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        lock.lock_owned().await
    }

    /// Loads an aggregate by replaying its stream.
    pub async fn load<A: Aggregate>(&self, aggregate_id: &str) -> Result<Versioned<A>, StoreError> {
        self.try_load(aggregate_id).await?.ok_or_else(|| StoreError::NotFound {
            aggregate_type: A::AGGREGATE_TYPE,
            aggregate_id: aggregate_id.to_string(),
        })
    }

    /// Loads an aggregate, returning `None` for an empty stream.
    pub async fn try_load<A: Aggregate>(&self, aggregate_id: &str) -> Result<Option<Versioned<A>>, StoreError> {
        let stream = StreamKey::new(A::AGGREGATE_TYPE, aggregate_id);
        let envelopes = self.backend.read(&stream).await?;

        if envelopes.is_empty() {
            return Ok(None);
        }

        let mut hydrated = Versioned::<A>::empty();

        for envelope in &envelopes {
            let event: A::Event = envelope.decode()?;
            hydrated.state.apply(&event);
            hydrated.version += 1;
        }

        Ok(Some(hydrated))
    }

    /// Reads the raw envelopes of a stream, oldest first.
    pub async fn read_stream<A: Aggregate>(&self, aggregate_id: &str) -> Result<Vec<EventEnvelope>, StoreError> {
        let stream = StreamKey::new(A::AGGREGATE_TYPE, aggregate_id);
        self.backend.read(&stream).await
    }

    /// Commits an event batch at `prior_version` and publishes the committed
    /// envelopes. An empty batch is a no-op returning `prior_version`.
    pub async fn commit<A: Aggregate>(
        &self,
        aggregate_id: &str,
        prior_version: u64,
        events: &[A::Event],
        metadata: EventMetadata,
    ) -> Result<u64, StoreError> {
        if events.is_empty() {
            return Ok(prior_version);
        }

        let stream = StreamKey::new(A::AGGREGATE_TYPE, aggregate_id);
        let mut batch = Vec::with_capacity(events.len());

        for event in events {
            let payload = serde_json::to_value(event)?;
            let event_type = payload
                .get("type")
                .and_then(|tag| tag.as_str())
                .unwrap_or("unknown")
                .to_string();

            batch.push(NewEvent {
                event_type,
                payload,
                metadata: metadata.clone(),
            });
        }

        let committed = self.backend.append(&stream, prior_version, batch).await?;
        let new_version = committed.last().map(|envelope| envelope.sequence).unwrap_or(prior_version);

        for envelope in committed {
            // Send fails only when nobody subscribes, which is fine.
            let _ = self.bus.send(envelope);
        }

        log::debug!("committed {} event(s) on {stream} at version {new_version}", events.len());

        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::InMemoryBackend;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum CounterEvent {
        Started { id: String },
        Incremented { by: u64 },
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        id: String,
        total: u64,
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        const AGGREGATE_TYPE: &'static str = "counter";

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Started { id } => self.id = id.clone(),
                CounterEvent::Incremented { by } => self.total += by,
            }
        }
    }

    fn store() -> EventStore {
        EventStore::new(Arc::new(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn commit_and_replay_reconstructs_state() {
        let store = store();

        let events = vec![
            CounterEvent::Started { id: "c1".into() },
            CounterEvent::Incremented { by: 2 },
            CounterEvent::Incremented { by: 3 },
        ];

        let version = store
            .commit::<Counter>("c1", 0, &events, EventMetadata::default())
            .await
            .unwrap();
        assert_eq!(version, 3);

        let loaded = store.load::<Counter>("c1").await.unwrap();
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.state, Counter { id: "c1".into(), total: 5 });

        // Replay equals in-memory fold of the same events.
        let mut folded = Versioned::<Counter>::empty();
        folded.apply_all(&events);
        assert_eq!(folded.state, loaded.state);
        assert_eq!(folded.version, loaded.version);
    }

    #[tokio::test]
    async fn stale_writer_conflicts_and_retry_succeeds() {
        let store = store();

        store
            .commit::<Counter>("c1", 0, &[CounterEvent::Started { id: "c1".into() }], EventMetadata::default())
            .await
            .unwrap();

        // Both writers observed version 1; the first wins.
        let first = store
            .commit::<Counter>("c1", 1, &[CounterEvent::Incremented { by: 1 }], EventMetadata::default())
            .await
            .unwrap();
        assert_eq!(first, 2);

        let err = store
            .commit::<Counter>("c1", 1, &[CounterEvent::Incremented { by: 9 }], EventMetadata::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Reload and retry at the fresh version.
        let reloaded = store.load::<Counter>("c1").await.unwrap();
        let retried = store
            .commit::<Counter>(
                "c1",
                reloaded.version,
                &[CounterEvent::Incremented { by: 9 }],
                EventMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(retried, 3);
    }

    #[tokio::test]
    async fn committed_events_are_published_in_order() {
        let store = store();
        let mut rx = store.subscribe();

        store
            .commit::<Counter>(
                "c1",
                0,
                &[
                    CounterEvent::Started { id: "c1".into() },
                    CounterEvent::Incremented { by: 7 },
                ],
                EventMetadata::for_user("user-1"),
            )
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, "started");
        assert_eq!(first.sequence, 1);
        assert_eq!(first.metadata.user_id.as_deref(), Some("user-1"));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type, "incremented");
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn missing_aggregate_is_not_found() {
        let store = store();

        assert!(store.try_load::<Counter>("nope").await.unwrap().is_none());
        assert!(matches!(
            store.load::<Counter>("nope").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let store = store();
        let version = store.commit::<Counter>("c1", 0, &[], EventMetadata::default()).await.unwrap();
        assert_eq!(version, 0);
        assert!(store.try_load::<Counter>("c1").await.unwrap().is_none());
    }
}
