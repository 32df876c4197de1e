//! Observers of the state machine life cycle.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::TransitionContext;
use crate::definition::{EventId, StateId, TransitionDefinition};
use crate::error::SharedError;
use crate::holder::EventArgument;

/// Observer notified at every step of the machine's life cycle.
///
/// All methods default to doing nothing. Notifications are delivered
/// synchronously, in registration order, on the thread executing the machine.
/// The `handling_*` methods receive the failure by mutable reference and may
/// replace it before it is surfaced.
#[allow(unused_variables)]
pub trait Extension<S: StateId, E: EventId>: Send + Sync {
    /// The worker of an active machine was started.
    fn started_state_machine(&self, machine: &str) {}

    /// The worker of an active machine was stopped.
    fn stopped_state_machine(&self, machine: &str) {}

    /// An event was appended to the queue of an active machine.
    fn event_queued(&self, event: &E, argument: &EventArgument) {}

    /// An event was put at the head of the queue of an active machine.
    fn event_queued_with_priority(&self, event: &E, argument: &EventArgument) {}

    /// The initial state was set.
    fn initialized_state_machine(&self, machine: &str, initial_state: &S) {}

    /// The initial state is about to be entered.
    fn entering_initial_state(&self, state: &S) {}

    /// The initial state was entered and resolved to `state`.
    fn entered_initial_state(&self, state: &S, context: &TransitionContext<'_, S, E>) {}

    /// An event is about to be dispatched; event and argument may be replaced.
    fn firing_event(&self, event: &mut E, argument: &mut EventArgument) {}

    /// An event was dispatched and fired a transition.
    fn fired_event(&self, context: &TransitionContext<'_, S, E>) {}

    /// The current state changed.
    fn switched_state(&self, old_state: Option<&S>, new_state: &S) {}

    /// An entry action failed.
    fn handling_entry_action_exception(
        &self,
        state: &S,
        context: &TransitionContext<'_, S, E>,
        error: &mut SharedError,
    ) {
    }

    /// A failed entry action was surfaced.
    fn handled_entry_action_exception(
        &self,
        state: &S,
        context: &TransitionContext<'_, S, E>,
        error: &SharedError,
    ) {
    }

    /// An exit action failed.
    fn handling_exit_action_exception(
        &self,
        state: &S,
        context: &TransitionContext<'_, S, E>,
        error: &mut SharedError,
    ) {
    }

    /// A failed exit action was surfaced.
    fn handled_exit_action_exception(
        &self,
        state: &S,
        context: &TransitionContext<'_, S, E>,
        error: &SharedError,
    ) {
    }

    /// A guard failed.
    fn handling_guard_exception(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
        error: &mut SharedError,
    ) {
    }

    /// A failed guard was surfaced; the transition is skipped.
    fn handled_guard_exception(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
        error: &SharedError,
    ) {
    }

    /// A transition action failed.
    fn handling_transition_exception(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
        error: &mut SharedError,
    ) {
    }

    /// A failed transition action was surfaced.
    fn handled_transition_exception(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
        error: &SharedError,
    ) {
    }

    /// The guard of `transition` rejected the event.
    fn skipped_transition(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
    ) {
    }

    /// `transition` passed its guard and starts executing.
    fn executing_transition(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
    ) {
    }

    /// `transition` finished executing.
    fn executed_transition(
        &self,
        transition: &TransitionDefinition<E>,
        context: &TransitionContext<'_, S, E>,
    ) {
    }

    /// Saved state was loaded into the machine.
    fn loaded(&self, current_state: Option<&S>, history_states: &HashMap<S, S>) {}
}

/// Registered extensions of one machine.
///
/// Cloning yields a handle to the same list. Every notification iterates over a
/// snapshot, so extensions may be added while a notification is delivered.
pub struct ExtensionHost<S: StateId, E: EventId> {
    extensions: Arc<RwLock<Vec<Arc<dyn Extension<S, E>>>>>,
}

impl<S: StateId, E: EventId> Clone for ExtensionHost<S, E> {
    fn clone(&self) -> Self {
        Self {
            extensions: Arc::clone(&self.extensions),
        }
    }
}

impl<S: StateId, E: EventId> Default for ExtensionHost<S, E> {
    fn default() -> Self {
        Self {
            extensions: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<S: StateId, E: EventId> ExtensionHost<S, E> {
    /// Register an extension behind the existing ones.
    pub fn add(&self, extension: Arc<dyn Extension<S, E>>) {
        self.extensions.write().push(extension);
    }

    /// Remove every extension.
    pub fn clear(&self) {
        self.extensions.write().clear();
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    /// True when no extension is registered.
    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    /// Call `notify` for every extension in registration order.
    pub fn for_each(&self, mut notify: impl FnMut(&dyn Extension<S, E>)) {
        let snapshot = self.extensions.read().clone();
        for extension in &snapshot {
            notify(extension.as_ref());
        }
    }
}
