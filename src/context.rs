//! Per-event transition context.

use std::fmt::{self, Debug, Display};

use crate::definition::{EventId, StateId, StateIndex};
use crate::error::{Error, SharedError};
use crate::holder::EventArgument;

/// Receives the notifications a [`TransitionContext`] raises while a transition
/// executes.
pub trait Notifier<S: StateId, E: EventId>: Sync {
    /// A transition passed its guard and starts executing.
    fn on_transition_begin(&self, context: &TransitionContext<'_, S, E>);

    /// A guard or action failed.
    ///
    /// An error return aborts the running transition.
    fn on_exception_thrown(
        &self,
        context: &TransitionContext<'_, S, E>,
        error: &SharedError,
    ) -> Result<(), Error<S>>;
}

/// Kind of a trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// State was entered
    Enter,
    /// State was exited
    Exit,
}

/// One step of the transition trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<S> {
    /// State the step applies to
    pub state: S,
    /// What happened
    pub record_type: RecordType,
}

impl<S: Debug> Display for Record<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_type {
            RecordType::Enter => write!(f, "Enter {:?}", self.state),
            RecordType::Exit => write!(f, "Exit {:?}", self.state),
        }
    }
}

/// Everything known about one fired event (or the initial state entry).
///
/// Created fresh for every event; never reused.
pub struct TransitionContext<'a, S: StateId, E: EventId> {
    state: StateIndex,
    state_id: S,
    event: Option<E>,
    argument: EventArgument,
    notifier: &'a dyn Notifier<S, E>,
    records: Vec<Record<S>>,
    exceptions: Vec<SharedError>,
}

impl<'a, S: StateId, E: EventId> TransitionContext<'a, S, E> {
    /// Context for `event` fired while `state` is active. `event` is `None` when
    /// entering the initial state.
    pub fn new(
        state: StateIndex,
        state_id: S,
        event: Option<E>,
        argument: EventArgument,
        notifier: &'a dyn Notifier<S, E>,
    ) -> Self {
        Self {
            state,
            state_id,
            event,
            argument,
            notifier,
            records: Vec::new(),
            exceptions: Vec::new(),
        }
    }

    /// State that was active when the event was fired.
    pub fn state(&self) -> StateIndex {
        self.state
    }

    /// Identifier of [`state`](Self::state).
    pub fn state_id(&self) -> &S {
        &self.state_id
    }

    /// Fired event, `None` while entering the initial state.
    pub fn event(&self) -> Option<&E> {
        self.event.as_ref()
    }

    /// Argument of the fired event.
    pub fn argument(&self) -> &EventArgument {
        &self.argument
    }

    /// Append a trace record.
    pub fn add_record(&mut self, state: S, record_type: RecordType) {
        self.records.push(Record { state, record_type });
    }

    /// Trace records in execution order.
    pub fn records(&self) -> &[Record<S>] {
        &self.records
    }

    /// Trace rendered on one line.
    pub fn describe_records(&self) -> String {
        self.records
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Failures surfaced so far.
    pub fn exceptions(&self) -> &[SharedError] {
        &self.exceptions
    }

    /// Surface a guard or action failure.
    pub fn on_exception_thrown(&mut self, error: SharedError) -> Result<(), Error<S>> {
        log::warn!(
            "{:?} failed in state {:?}: {}",
            self.event,
            self.state_id,
            error
        );
        self.exceptions.push(error.clone());
        let notifier = self.notifier;
        notifier.on_exception_thrown(self, &error)
    }

    /// Announce that a transition starts executing.
    pub fn on_transition_begin(&self) {
        self.notifier.on_transition_begin(self);
    }
}

impl<S: StateId, E: EventId> Debug for TransitionContext<'_, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionContext")
            .field("state", &self.state_id)
            .field("event", &self.event)
            .field("argument", &self.argument)
            .field("records", &self.records)
            .finish()
    }
}
