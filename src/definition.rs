//! Immutable definition model: states, their hierarchy and their transitions.
//!
//! States live in an arena ([`StateDefinitions`]) and refer to each other through
//! [`StateIndex`] values. Sub-state lists are the owning edges of the tree; the
//! super-state link is a plain index back into the arena.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::Error;
use crate::holder::{ActionHolder, GuardHolder};

/// Requirements for state identifiers.
pub trait StateId: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> StateId for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Requirements for event identifiers.
pub trait EventId: Clone + Eq + Debug + Send + Sync + 'static {}

impl<T> EventId for T where T: Clone + Eq + Debug + Send + Sync + 'static {}

/// Which sub-state is entered when a composite state is entered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HistoryType {
    /// Always the declared initial sub-state
    #[default]
    None,
    /// The direct sub-state that was active last
    Shallow,
    /// The innermost state that was active last
    Deep,
}

/// Position of a state in its [`StateDefinitions`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateIndex(usize);

/// A transition declared on a state for one event.
///
/// Without target the transition is internal: its actions run but no state is
/// exited or entered.
#[derive(Debug)]
pub struct TransitionDefinition<E> {
    source: Option<StateIndex>,
    event: E,
    target: Option<StateIndex>,
    guard: Option<GuardHolder>,
    actions: Vec<ActionHolder>,
}

impl<E: EventId> TransitionDefinition<E> {
    /// Transition to `target`, or an internal transition for `None`.
    pub fn new(event: E, target: Option<StateIndex>) -> Self {
        Self {
            source: None,
            event,
            target,
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Attach a guard.
    pub fn with_guard(mut self, guard: GuardHolder) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Append an action.
    pub fn with_action(mut self, action: ActionHolder) -> Self {
        self.actions.push(action);
        self
    }

    /// Bind the transition to the state declaring it. Allowed once.
    pub fn set_source<S: Debug>(&mut self, source: StateIndex) -> Result<(), Error<S>> {
        if self.source.is_some() {
            return Err(Error::TransitionSourceAlreadySet {
                event: format!("{:?}", self.event),
            });
        }
        self.source = Some(source);
        Ok(())
    }

    /// State declaring the transition, once attached.
    pub fn source(&self) -> Option<StateIndex> {
        self.source
    }

    /// Triggering event.
    pub fn event(&self) -> &E {
        &self.event
    }

    /// Target state, `None` for internal transitions.
    pub fn target(&self) -> Option<StateIndex> {
        self.target
    }

    /// True when the transition has no target.
    pub fn is_internal(&self) -> bool {
        self.target.is_none()
    }

    /// Optional guard.
    pub fn guard(&self) -> Option<&GuardHolder> {
        self.guard.as_ref()
    }

    /// Actions in declaration order.
    pub fn actions(&self) -> &[ActionHolder] {
        &self.actions
    }
}

/// A single state of the machine.
#[derive(Debug)]
pub struct StateDefinition<S, E> {
    id: S,
    index: StateIndex,
    level: usize,
    super_state: Option<StateIndex>,
    sub_states: Vec<StateIndex>,
    history_type: HistoryType,
    initial_sub_state: Option<StateIndex>,
    entry_actions: Vec<ActionHolder>,
    exit_actions: Vec<ActionHolder>,
    transitions: Vec<(E, Vec<TransitionDefinition<E>>)>,
}

impl<S: StateId, E: EventId> StateDefinition<S, E> {
    fn new(id: S, index: StateIndex) -> Self {
        Self {
            id,
            index,
            level: 1,
            super_state: None,
            sub_states: Vec::new(),
            history_type: HistoryType::None,
            initial_sub_state: None,
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// State identifier.
    pub fn id(&self) -> &S {
        &self.id
    }

    /// Position in the arena.
    pub fn index(&self) -> StateIndex {
        self.index
    }

    /// Depth in the hierarchy, top-level states are on level 1.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Enclosing state.
    pub fn super_state(&self) -> Option<StateIndex> {
        self.super_state
    }

    /// Direct sub-states in declaration order.
    pub fn sub_states(&self) -> &[StateIndex] {
        &self.sub_states
    }

    /// True for composite states.
    pub fn has_sub_states(&self) -> bool {
        !self.sub_states.is_empty()
    }

    /// History policy used when the state is entered.
    pub fn history_type(&self) -> HistoryType {
        self.history_type
    }

    /// Sub-state entered when no history applies.
    pub fn initial_sub_state(&self) -> Option<StateIndex> {
        self.initial_sub_state
    }

    /// Entry actions in declaration order.
    pub fn entry_actions(&self) -> &[ActionHolder] {
        &self.entry_actions
    }

    /// Exit actions in declaration order.
    pub fn exit_actions(&self) -> &[ActionHolder] {
        &self.exit_actions
    }

    /// Candidate transitions per event, events in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = (&E, &[TransitionDefinition<E>])> + '_ {
        self.transitions
            .iter()
            .map(|(event, candidates)| (event, candidates.as_slice()))
    }

    /// Candidate transitions declared for `event`.
    pub fn transitions_for(&self, event: &E) -> Option<&[TransitionDefinition<E>]> {
        self.transitions
            .iter()
            .find(|(declared, _)| declared == event)
            .map(|(_, candidates)| candidates.as_slice())
    }
}

/// Arena holding every state of a machine.
#[derive(Debug)]
pub struct StateDefinitions<S, E> {
    states: Vec<StateDefinition<S, E>>,
    lookup: HashMap<S, StateIndex>,
}

impl<S: StateId, E: EventId> Default for StateDefinitions<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateId, E: EventId> StateDefinitions<S, E> {
    /// Empty arena.
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Index of `id`, registering it as a top-level state if unknown.
    pub fn add(&mut self, id: S) -> StateIndex {
        if let Some(index) = self.lookup.get(&id) {
            return *index;
        }
        let index = StateIndex(self.states.len());
        self.lookup.insert(id.clone(), index);
        self.states.push(StateDefinition::new(id, index));
        index
    }

    /// Index of `id` if registered.
    pub fn find(&self, id: &S) -> Option<StateIndex> {
        self.lookup.get(id).copied()
    }

    /// Index of `id`, failing for unknown states.
    pub fn require(&self, id: &S) -> Result<StateIndex, Error<S>> {
        self.find(id).ok_or_else(|| Error::StateNotRegistered(id.clone()))
    }

    /// State at `index`.
    ///
    /// # Panics
    /// If `index` was produced by another arena.
    pub fn get(&self, index: StateIndex) -> &StateDefinition<S, E> {
        &self.states[index.0]
    }

    fn get_mut(&mut self, index: StateIndex) -> &mut StateDefinition<S, E> {
        &mut self.states[index.0]
    }

    /// Identifier of the state at `index`.
    pub fn id(&self, index: StateIndex) -> &S {
        &self.get(index).id
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when no state is registered.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// All states in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StateDefinition<S, E>> + '_ {
        self.states.iter()
    }

    /// Top-level states in registration order.
    pub fn roots(&self) -> impl Iterator<Item = &StateDefinition<S, E>> + '_ {
        self.states.iter().filter(|state| state.super_state.is_none())
    }

    /// `index` followed by all of its ancestors, innermost first.
    pub fn ancestors(&self, index: StateIndex) -> Vec<StateIndex> {
        let mut chain = vec![index];
        let mut current = self.get(index).super_state;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.get(parent).super_state;
        }
        chain
    }

    /// True when `ancestor` encloses `state` or is `state` itself.
    pub fn is_ancestor_or_self(&self, ancestor: StateIndex, state: StateIndex) -> bool {
        self.ancestors(state).contains(&ancestor)
    }

    /// Attach `sub_state` to `super_state`.
    pub fn add_sub_state(
        &mut self,
        super_state: StateIndex,
        sub_state: StateIndex,
    ) -> Result<(), Error<S>> {
        if super_state == sub_state {
            return Err(Error::SelfSuperState(self.id(sub_state).clone()));
        }
        if let Some(existing) = self.get(sub_state).super_state {
            if existing == super_state {
                return Ok(());
            }
            return Err(Error::AlreadyHasSuperState {
                state: self.id(sub_state).clone(),
                super_state: self.id(existing).clone(),
            });
        }
        if self.is_ancestor_or_self(sub_state, super_state) {
            return Err(Error::CyclicHierarchy(self.id(sub_state).clone()));
        }

        self.set_super_state(sub_state, Some(super_state))?;
        self.get_mut(super_state).sub_states.push(sub_state);
        Ok(())
    }

    /// Set the super-state link and recompute the levels below `state`.
    pub(crate) fn set_super_state(
        &mut self,
        state: StateIndex,
        super_state: Option<StateIndex>,
    ) -> Result<(), Error<S>> {
        if super_state == Some(state) {
            return Err(Error::SelfSuperState(self.id(state).clone()));
        }
        let level = super_state.map_or(1, |parent| self.get(parent).level + 1);
        self.get_mut(state).super_state = super_state;
        self.set_level(state, level);
        Ok(())
    }

    /// Set the level of `state`; every descendant follows at parent + 1.
    pub fn set_level(&mut self, state: StateIndex, level: usize) {
        let mut pending = vec![(state, level)];
        while let Some((index, level)) = pending.pop() {
            let definition = self.get_mut(index);
            definition.level = level;
            pending.extend(definition.sub_states.iter().map(|sub| (*sub, level + 1)));
        }
    }

    /// Declare the sub-state entered by default.
    pub fn set_initial_sub_state(
        &mut self,
        state: StateIndex,
        initial: StateIndex,
    ) -> Result<(), Error<S>> {
        if state == initial {
            return Err(Error::SelfInitialSubState(self.id(state).clone()));
        }
        if self.get(initial).super_state != Some(state) {
            return Err(Error::NotADirectSubState {
                state: self.id(state).clone(),
                initial: self.id(initial).clone(),
            });
        }
        self.get_mut(state).initial_sub_state = Some(initial);
        Ok(())
    }

    /// Set the history policy of `state`.
    pub fn set_history_type(&mut self, state: StateIndex, history_type: HistoryType) {
        self.get_mut(state).history_type = history_type;
    }

    /// Append an entry action.
    pub fn add_entry_action(&mut self, state: StateIndex, action: ActionHolder) {
        self.get_mut(state).entry_actions.push(action);
    }

    /// Append an exit action.
    pub fn add_exit_action(&mut self, state: StateIndex, action: ActionHolder) {
        self.get_mut(state).exit_actions.push(action);
    }

    /// Declare `transition` on `state`.
    ///
    /// Candidates for one event are tried in declaration order, so nothing may
    /// follow a candidate without guard.
    pub fn add_transition(
        &mut self,
        state: StateIndex,
        mut transition: TransitionDefinition<E>,
    ) -> Result<(), Error<S>> {
        transition.set_source(state)?;

        let id = self.id(state).clone();
        let definition = self.get_mut(state);
        let position = definition
            .transitions
            .iter()
            .position(|(event, _)| event == transition.event());
        let candidates = match position {
            Some(position) => &mut definition.transitions[position].1,
            None => {
                definition
                    .transitions
                    .push((transition.event().clone(), Vec::new()));
                let last = definition.transitions.len() - 1;
                &mut definition.transitions[last].1
            }
        };
        if candidates.last().is_some_and(|last| last.guard().is_none()) {
            return Err(Error::UnreachableTransition {
                state: id,
                event: format!("{:?}", transition.event()),
            });
        }
        candidates.push(transition);
        Ok(())
    }

    /// Check that every composite state can be entered.
    pub fn validate(&self) -> Result<(), Error<S>> {
        match self
            .states
            .iter()
            .find(|state| state.has_sub_states() && state.initial_sub_state.is_none())
        {
            Some(state) => Err(Error::MissingInitialSubState(state.id.clone())),
            None => Ok(()),
        }
    }
}
