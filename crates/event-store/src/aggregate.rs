use serde::{Serialize, de::DeserializeOwned};

/// An event-sourced aggregate: a state record rebuilt by folding a closed
/// set of event variants.
///
/// Command methods live on the implementing type and return the events they
/// would append; they never mutate state directly. The store applies events
/// both on replay and after a successful commit, so the fold is the single
/// source of truth for state transitions.
pub trait Aggregate: Default + Send + Sync {
    /// The closed set of event variants for this aggregate. Variants must
    /// serialize with an internal `type` tag; the tag becomes the persisted
    /// `event_type`.
    type Event: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Stream namespace for this aggregate type.
    const AGGREGATE_TYPE: &'static str;

    /// Folds one event into the state.
    fn apply(&mut self, event: &Self::Event);
}

/// An aggregate hydrated from the store together with the stream version it
/// was read at. The version is the `prior_version` for the next commit.
#[derive(Debug, Clone)]
pub struct Versioned<A: Aggregate> {
    /// The replayed aggregate state.
    pub state: A,
    /// Number of events folded into `state`.
    pub version: u64,
}

impl<A: Aggregate> Versioned<A> {
    /// An empty aggregate at version zero, ready for a creation commit.
    pub fn empty() -> Self {
        Self {
            state: A::default(),
            version: 0,
        }
    }

    /// Folds freshly committed events into the hydrated state, keeping the
    /// version in step with the stream.
    pub fn apply_all(&mut self, events: &[A::Event]) {
        for event in events {
            self.state.apply(event);
            self.version += 1;
        }
    }
}
