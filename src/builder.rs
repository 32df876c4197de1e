//! Builder pattern implementation for state machine definitions

use std::collections::HashMap;
use std::sync::Arc;

use crate::active::ActiveStateMachine;
use crate::definition::{
    EventId, HistoryType, StateDefinitions, StateId, StateIndex, TransitionDefinition,
};
use crate::error::Error;
use crate::fsm::StateMachine;
use crate::holder::{ActionHolder, GuardHolder};
use crate::state_logic::LastActiveStates;

/// A transition waiting to be attached to its source state.
///
/// Created with [`Transition::to`] or [`Transition::internal`] and passed to
/// [`StateMachineBuilder::transition`].
#[derive(Debug)]
pub struct Transition<S> {
    target: Option<S>,
    guard: Option<GuardHolder>,
    actions: Vec<ActionHolder>,
}

impl<S> Transition<S> {
    /// Transition into `target`.
    pub fn to(target: S) -> Self {
        Self {
            target: Some(target),
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Transition executing its actions without leaving the current state.
    pub fn internal() -> Self {
        Self {
            target: None,
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Only fire when `guard` passes.
    pub fn guard(mut self, guard: GuardHolder) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Execute `action` while firing.
    pub fn action(mut self, action: ActionHolder) -> Self {
        self.actions.push(action);
        self
    }
}

/// Builder for constructing state machine definitions
///
/// Every method registers unknown states on the fly. The first failing call is
/// remembered and returned by [`build`](Self::build); later calls are ignored.
pub struct StateMachineBuilder<S: StateId, E: EventId> {
    states: StateDefinitions<S, E>,
    initial_state: Option<S>,
    last_active_states: HashMap<S, S>,
    error: Option<Error<S>>,
}

impl<S: StateId, E: EventId> Default for StateMachineBuilder<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateId, E: EventId> StateMachineBuilder<S, E> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            states: StateDefinitions::new(),
            initial_state: None,
            last_active_states: HashMap::new(),
            error: None,
        }
    }

    fn apply(
        mut self,
        step: impl FnOnce(&mut StateDefinitions<S, E>) -> Result<(), Error<S>>,
    ) -> Self {
        if self.error.is_none() {
            if let Err(error) = step(&mut self.states) {
                self.error = Some(error);
            }
        }
        self
    }

    /// Declare a state without hierarchy, actions or transitions.
    pub fn state(self, state: S) -> Self {
        self.apply(|states| {
            states.add(state);
            Ok(())
        })
    }

    /// Nest `sub_states` and `initial` in `super_state`.
    ///
    /// `initial` is entered when `super_state` is entered without applicable
    /// history; it does not need to be repeated in `sub_states`.
    pub fn hierarchy(
        self,
        super_state: S,
        history_type: HistoryType,
        initial: S,
        sub_states: impl IntoIterator<Item = S>,
    ) -> Self {
        self.apply(|states| {
            let parent = states.add(super_state);
            let initial = states.add(initial);
            states.add_sub_state(parent, initial)?;
            for sub_state in sub_states {
                let child = states.add(sub_state);
                states.add_sub_state(parent, child)?;
            }
            states.set_initial_sub_state(parent, initial)?;
            states.set_history_type(parent, history_type);
            Ok(())
        })
    }

    /// Execute `action` whenever `state` is entered.
    pub fn entry(self, state: S, action: ActionHolder) -> Self {
        self.apply(|states| {
            let index = states.add(state);
            states.add_entry_action(index, action);
            Ok(())
        })
    }

    /// Execute `action` whenever `state` is exited.
    pub fn exit(self, state: S, action: ActionHolder) -> Self {
        self.apply(|states| {
            let index = states.add(state);
            states.add_exit_action(index, action);
            Ok(())
        })
    }

    /// Declare `transition` on `state` for `event`.
    ///
    /// Transitions declared for the same event are tried in declaration order.
    pub fn transition(self, state: S, event: E, transition: Transition<S>) -> Self {
        self.apply(|states| {
            let source = states.add(state);
            let target = transition.target.map(|target| states.add(target));
            let mut definition = TransitionDefinition::new(event, target);
            if let Some(guard) = transition.guard {
                definition = definition.with_guard(guard);
            }
            for action in transition.actions {
                definition = definition.with_action(action);
            }
            states.add_transition(source, definition)
        })
    }

    /// State machines created from the definition start in `state`.
    pub fn initial_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Pretend `super_state` was left from `sub_state` before.
    ///
    /// `sub_state` must be a direct sub-state for shallow history and may be any
    /// descendant for deep history.
    pub fn last_active_state(mut self, super_state: S, sub_state: S) -> Self {
        self.last_active_states.insert(super_state, sub_state);
        self
    }

    /// Validate and freeze the definition.
    pub fn build(self) -> Result<StateMachineDefinition<S, E>, Error<S>> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.states.validate()?;
        let initial_state = self
            .initial_state
            .map(|initial| self.states.require(&initial))
            .transpose()?;
        let last_active = LastActiveStates::from_ids(&self.states, &self.last_active_states)?;
        Ok(StateMachineDefinition {
            states: Arc::new(self.states),
            initial_state,
            last_active,
        })
    }
}

/// Immutable definition shared by any number of machines.
#[derive(Debug)]
pub struct StateMachineDefinition<S: StateId, E: EventId> {
    states: Arc<StateDefinitions<S, E>>,
    initial_state: Option<StateIndex>,
    last_active: LastActiveStates,
}

impl<S: StateId, E: EventId> StateMachineDefinition<S, E> {
    /// All states.
    pub fn states(&self) -> &StateDefinitions<S, E> {
        &self.states
    }

    /// Handle to the states, for machines created with [`StateMachine::new`].
    pub fn shared_states(&self) -> Arc<StateDefinitions<S, E>> {
        Arc::clone(&self.states)
    }

    /// Initial state given to new machines.
    pub fn initial_state(&self) -> Option<&S> {
        self.initial_state.map(|initial| self.states.id(initial))
    }

    /// New passive machine, initialized if the definition has an initial state.
    pub fn create_passive_state_machine(&self, name: impl Into<String>) -> StateMachine<S, E> {
        let machine = StateMachine::new(name, Arc::clone(&self.states))
            .with_last_active(self.last_active.clone());
        match self.initial_state {
            Some(initial) => machine.with_initial_state(initial),
            None => machine,
        }
    }

    /// New active machine, initialized if the definition has an initial state.
    pub fn create_active_state_machine(
        &self,
        name: impl Into<String>,
    ) -> ActiveStateMachine<S, E> {
        ActiveStateMachine::new(self.create_passive_state_machine(name))
    }
}
