//! Per-connection session state: the phase machine, the outbound event
//! queue, and per-item execution bookkeeping.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use catalog::ToolId;
use context::CallerToken;
use jiff::Timestamp;
use llm::ToolSpec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{OrchestratorError, WireEvent};

/// Orchestrator phases for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Session opening; definition and template loading.
    Initializing,
    /// Waiting for a user message.
    Ready,
    /// A reactive turn is running.
    Processing,
    /// Template items are being rendered.
    Presenting,
    /// A widget awaits a client response.
    Suspended,
    /// Explicitly paused.
    Paused,
    /// Terminal: normal end.
    Completed,
    /// Terminal: unrecoverable failure.
    Error,
}

impl SessionPhase {
    /// Whether a transition to `target` is legal.
    pub fn can_transition_to(self, target: SessionPhase) -> bool {
        use SessionPhase::*;

        if matches!(self, Completed | Error) {
            return false;
        }

        // Any non-terminal phase may complete or fail.
        if matches!(target, Completed | Error) {
            return true;
        }

        matches!(
            (self, target),
            (Initializing, Ready)
                | (Initializing, Presenting)
                | (Ready, Processing)
                | (Processing, Ready)
                | (Processing, Suspended)
                | (Presenting, Suspended)
                // A template made only of display items ends its flow from
                // PRESENTING when continue_after_completion is set.
                | (Presenting, Ready)
                | (Suspended, Presenting)
                | (Suspended, Ready)
                | (Ready, Paused)
                | (Presenting, Paused)
                | (Paused, Ready)
                | (Paused, Presenting)
        )
    }
}

/// Progress through the current template item.
#[derive(Debug, Clone, Default)]
pub struct ItemExecution {
    /// Widget ids that must be answered before the item advances.
    pub required_widgets: BTreeSet<String>,
    /// Widget ids answered so far.
    pub answered_widgets: BTreeSet<String>,
    /// Whether a confirmation button gates the item.
    pub confirmation_required: bool,
    /// Whether the confirmation button was pressed.
    pub confirmed: bool,
    /// When the item was presented.
    pub started_at: Option<Timestamp>,
}

impl ItemExecution {
    /// Whether every gate for advancing is satisfied.
    pub fn is_satisfied(&self) -> bool {
        self.required_widgets.is_subset(&self.answered_widgets) && (!self.confirmation_required || self.confirmed)
    }
}

/// In-memory state for one live streaming connection.
pub struct Session {
    /// Stream request id, used by `cancel`.
    pub request_id: String,
    /// The conversation this session drives.
    pub conversation_id: String,
    /// The authenticated caller.
    pub caller: CallerToken,
    /// Bound agent definition.
    pub definition_id: Option<String>,
    /// Tools resolved for this caller at session open.
    pub tools: Vec<ToolSpec>,
    /// Wire tool name → catalog tool id, for routing model tool calls.
    pub tool_ids: HashMap<String, ToolId>,
    /// Model for this session, in `provider/model` form.
    pub model_id: Option<String>,
    phase: Mutex<SessionPhase>,
    item: Mutex<Option<ItemExecution>>,
    scores: Mutex<Vec<(usize, f64, f64)>>,
    cancel: CancellationToken,
    events: mpsc::Sender<WireEvent>,
    sequence: AtomicU64,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        request_id: String,
        conversation_id: String,
        caller: CallerToken,
        definition_id: Option<String>,
        tools: Vec<ToolSpec>,
        tool_ids: HashMap<String, ToolId>,
        model_id: Option<String>,
        events: mpsc::Sender<WireEvent>,
    ) -> Self {
        Self {
            request_id,
            conversation_id,
            caller,
            definition_id,
            tools,
            tool_ids,
            model_id,
            phase: Mutex::new(SessionPhase::Initializing),
            item: Mutex::new(None),
            scores: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            events,
            sequence: AtomicU64::new(0),
        }
    }

    /// The current phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validated phase transition. An illegal target is rejected without a
    /// state change and logged.
    pub fn transition(&self, target: SessionPhase) -> Result<(), OrchestratorError> {
        let mut phase = self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !phase.can_transition_to(target) {
            log::warn!(
                "session {}: rejected transition {} -> {target}",
                self.request_id,
                *phase
            );
            return Err(OrchestratorError::InvalidState {
                action: "transition",
                phase: *phase,
            });
        }

        log::debug!("session {}: {} -> {target}", self.request_id, *phase);
        *phase = target;
        Ok(())
    }

    /// Replaces the per-item execution state.
    pub fn begin_item(&self, execution: ItemExecution) {
        *self.item.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(execution);
    }

    /// Runs a closure over the current item state, if any.
    pub fn with_item<T>(&self, f: impl FnOnce(&mut ItemExecution) -> T) -> Option<T> {
        self.item
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_mut()
            .map(f)
    }

    /// Clears the per-item execution state.
    pub fn clear_item(&self) {
        *self.item.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Records one item's score for the final report.
    pub fn record_score(&self, item_index: usize, awarded: f64, possible: f64) {
        self.scores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((item_index, awarded, possible));
    }

    /// Recorded `(item_index, awarded, possible)` triples.
    pub fn scores(&self) -> Vec<(usize, f64, f64)> {
        self.scores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The session-scoped cancellation token, checked at every suspension
    /// point.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Marks the in-flight turn cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Emits one event on the outbound queue, assigning its sequence
    /// number. Emission is serialized per connection by the channel.
    pub async fn emit(&self, mut event: WireEvent) {
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        if self.events.send(event).await.is_err() {
            log::debug!("session {}: client channel closed, dropping event", self.request_id);
        }
    }

    /// Whether the client is still connected.
    pub fn is_connected(&self) -> bool {
        !self.events.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_and_illegal_transitions() {
        use SessionPhase::*;

        assert!(Initializing.can_transition_to(Ready));
        assert!(Initializing.can_transition_to(Presenting));
        assert!(Ready.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Presenting));
        assert!(Suspended.can_transition_to(Ready));
        assert!(Paused.can_transition_to(Ready));

        assert!(Presenting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Presenting));
        assert!(!Initializing.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Presenting));

        // Terminal states accept nothing, everything may terminate.
        assert!(Processing.can_transition_to(Error));
        assert!(Suspended.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Ready));
        assert!(!Error.can_transition_to(Ready));
    }

    #[test]
    fn item_execution_gates_on_required_and_confirmation() {
        let mut item = ItemExecution {
            required_widgets: BTreeSet::from(["w1".to_string(), "w2".to_string()]),
            confirmation_required: true,
            ..Default::default()
        };

        assert!(!item.is_satisfied());

        item.answered_widgets.insert("w1".to_string());
        item.answered_widgets.insert("w2".to_string());
        assert!(!item.is_satisfied());

        item.confirmed = true;
        assert!(item.is_satisfied());
    }
}
