//! Entering and exiting single states, and resolving history.

use std::collections::HashMap;

use crate::context::{RecordType, TransitionContext};
use crate::definition::{
    EventId, HistoryType, StateDefinition, StateDefinitions, StateId, StateIndex,
};
use crate::error::{Error, SharedError};
use crate::extension::ExtensionHost;

/// History state of every exited composite state that keeps history.
///
/// Shallow history maps to the direct sub-state that was active, deep history
/// to the innermost state the composite state was left from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LastActiveStates(HashMap<StateIndex, StateIndex>);

impl LastActiveStates {
    pub fn get(&self, super_state: StateIndex) -> Option<StateIndex> {
        self.0.get(&super_state).copied()
    }

    pub fn set(&mut self, super_state: StateIndex, sub_state: StateIndex) {
        self.0.insert(super_state, sub_state);
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateIndex, StateIndex)> + '_ {
        self.0.iter().map(|(super_state, sub_state)| (*super_state, *sub_state))
    }

    /// Remember where `state` was left from, given the active `leaf`.
    pub fn record<S: StateId, E: EventId>(
        &mut self,
        states: &StateDefinitions<S, E>,
        state: StateIndex,
        leaf: StateIndex,
    ) {
        if leaf == state || !states.is_ancestor_or_self(state, leaf) {
            return;
        }
        match states.get(state).history_type() {
            HistoryType::None => {}
            HistoryType::Shallow => {
                let child = states
                    .ancestors(leaf)
                    .into_iter()
                    .find(|index| states.get(*index).super_state() == Some(state));
                if let Some(child) = child {
                    self.set(state, child);
                }
            }
            HistoryType::Deep => self.set(state, leaf),
        }
    }

    /// Identifier based copy, as saved by persistence.
    pub fn to_ids<S: StateId, E: EventId>(
        &self,
        states: &StateDefinitions<S, E>,
    ) -> HashMap<S, S> {
        self.iter()
            .map(|(super_state, sub_state)| {
                (states.id(super_state).clone(), states.id(sub_state).clone())
            })
            .collect()
    }

    /// Resolve saved identifiers against the history type of each key.
    ///
    /// Shallow history needs a direct sub-state, deep history any descendant.
    /// States without history never have an entry.
    pub fn from_ids<S: StateId, E: EventId>(
        states: &StateDefinitions<S, E>,
        history: &HashMap<S, S>,
    ) -> Result<Self, Error<S>> {
        let mut resolved = Self::default();
        for (super_id, sub_id) in history {
            let super_state = states.require(super_id)?;
            let sub_state = states.require(sub_id)?;
            let valid = match states.get(super_state).history_type() {
                HistoryType::None => false,
                HistoryType::Shallow => states.get(sub_state).super_state() == Some(super_state),
                HistoryType::Deep => {
                    sub_state != super_state && states.is_ancestor_or_self(super_state, sub_state)
                }
            };
            if !valid {
                return Err(Error::InvalidHistoryState {
                    super_state: super_id.clone(),
                    child: sub_id.clone(),
                });
            }
            resolved.set(super_state, sub_state);
        }
        Ok(resolved)
    }
}

#[derive(Clone, Copy)]
enum ActionKind {
    Entry,
    Exit,
}

/// Executes entry and exit actions of states.
pub(crate) struct StateLogic<'a, S: StateId, E: EventId> {
    states: &'a StateDefinitions<S, E>,
    extensions: &'a ExtensionHost<S, E>,
}

impl<S: StateId, E: EventId> Clone for StateLogic<'_, S, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: StateId, E: EventId> Copy for StateLogic<'_, S, E> {}

impl<'a, S: StateId, E: EventId> StateLogic<'a, S, E> {
    pub fn new(states: &'a StateDefinitions<S, E>, extensions: &'a ExtensionHost<S, E>) -> Self {
        Self { states, extensions }
    }

    /// Run the entry actions of `state`. A failing action does not stop the others.
    pub async fn entry(
        &self,
        state: StateIndex,
        context: &mut TransitionContext<'_, S, E>,
    ) -> Result<(), Error<S>> {
        let definition = self.states.get(state);
        context.add_record(definition.id().clone(), RecordType::Enter);

        for action in definition.entry_actions() {
            let outcome = action.execute(context.argument()).await;
            if let Err(error) = outcome {
                self.handle_action_exception(ActionKind::Entry, definition, context, error)?;
            }
        }
        Ok(())
    }

    /// Run the exit actions of `state` and record its history state.
    ///
    /// The active state of `context` tells which sub-state `state` is left from.
    pub async fn exit(
        &self,
        state: StateIndex,
        context: &mut TransitionContext<'_, S, E>,
        last_active: &mut LastActiveStates,
    ) -> Result<(), Error<S>> {
        let definition = self.states.get(state);
        context.add_record(definition.id().clone(), RecordType::Exit);

        for action in definition.exit_actions() {
            let outcome = action.execute(context.argument()).await;
            if let Err(error) = outcome {
                self.handle_action_exception(ActionKind::Exit, definition, context, error)?;
            }
        }

        last_active.record(self.states, state, context.state());
        Ok(())
    }

    /// Enter the sub-states below the already entered `state` and return the
    /// innermost state settled into.
    ///
    /// A recorded history state is entered together with the states between it
    /// and its composite state. Without history the initial sub-state is used.
    pub async fn enter_by_history(
        &self,
        state: StateIndex,
        context: &mut TransitionContext<'_, S, E>,
        last_active: &LastActiveStates,
    ) -> Result<StateIndex, Error<S>> {
        let mut current = state;

        loop {
            let definition = self.states.get(current);
            if !definition.has_sub_states() {
                return Ok(current);
            }

            let remembered = match definition.history_type() {
                HistoryType::None => None,
                HistoryType::Shallow | HistoryType::Deep => last_active.get(current),
            };
            let next = match remembered.or(definition.initial_sub_state()) {
                Some(next) => next,
                None => return Ok(current),
            };

            let mut path: Vec<_> = self
                .states
                .ancestors(next)
                .into_iter()
                .take_while(|index| *index != current)
                .collect();
            path.reverse();
            for step in path {
                self.entry(step, context).await?;
            }
            current = next;
        }
    }

    fn handle_action_exception(
        &self,
        kind: ActionKind,
        definition: &StateDefinition<S, E>,
        context: &mut TransitionContext<'_, S, E>,
        mut error: SharedError,
    ) -> Result<(), Error<S>> {
        let state = definition.id();
        self.extensions.for_each(|extension| match kind {
            ActionKind::Entry => {
                extension.handling_entry_action_exception(state, context, &mut error)
            }
            ActionKind::Exit => {
                extension.handling_exit_action_exception(state, context, &mut error)
            }
        });

        context.on_exception_thrown(error.clone())?;

        self.extensions.for_each(|extension| match kind {
            ActionKind::Entry => extension.handled_entry_action_exception(state, context, &error),
            ActionKind::Exit => extension.handled_exit_action_exception(state, context, &error),
        });
        Ok(())
    }
}
