//! Saving and restoring machine state.
//!
//! The engine does not store anything itself. On save it hands the current
//! state, the history states and (for active machines) the queued events to a
//! [`StateMachineSaver`]; on load it asks a [`StateMachineLoader`] for the same.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

use crate::definition::{EventId, StateId};
use crate::error::{BoxError, Error, SharedError};
use crate::holder::EventArgument;

/// Event waiting in the queue of an active machine.
#[derive(Debug, Clone)]
pub struct EventInformation<E> {
    /// Event id
    pub event: E,
    /// Argument passed along
    pub argument: EventArgument,
}

impl<E> EventInformation<E> {
    /// Event without argument.
    pub fn new(event: E) -> Self {
        Self {
            event,
            argument: EventArgument::missing(),
        }
    }

    /// Event carrying `argument`.
    pub fn with_argument(event: E, argument: EventArgument) -> Self {
        Self { event, argument }
    }
}

/// Snapshot of a machine: the active state and the history state of every
/// composite state with history that was left.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize + Eq + Hash",
    deserialize = "S: Deserialize<'de> + Eq + Hash"
))]
pub struct SavedState<S> {
    /// Active state, `None` before the initial state was entered
    pub current_state: Option<S>,
    /// Composite state id to history state id
    pub history_states: HashMap<S, S>,
}

impl<S: Eq + Hash> PartialEq for SavedState<S> {
    fn eq(&self, other: &Self) -> bool {
        self.current_state == other.current_state && self.history_states == other.history_states
    }
}

impl<S: Eq + Hash> Eq for SavedState<S> {}

impl<S> Default for SavedState<S> {
    fn default() -> Self {
        Self {
            current_state: None,
            history_states: HashMap::new(),
        }
    }
}

/// Receives the state of a machine being saved.
#[async_trait]
pub trait StateMachineSaver<S: StateId, E: EventId>: Send {
    /// Store the active state.
    async fn save_current_state(&mut self, current_state: Option<&S>) -> Result<(), BoxError>;

    /// Store the history states.
    async fn save_history_states(&mut self, history_states: &HashMap<S, S>)
        -> Result<(), BoxError>;

    /// Store the queued events of an active machine, in processing order.
    async fn save_events(&mut self, _events: &[EventInformation<E>]) -> Result<(), BoxError> {
        Ok(())
    }

    /// Store the queued priority events of an active machine, in processing order.
    async fn save_priority_events(
        &mut self,
        _events: &[EventInformation<E>],
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Provides the state of a machine being loaded.
#[async_trait]
pub trait StateMachineLoader<S: StateId, E: EventId>: Send {
    /// Active state to restore.
    async fn load_current_state(&mut self) -> Result<Option<S>, BoxError>;

    /// History states to restore.
    async fn load_history_states(&mut self) -> Result<HashMap<S, S>, BoxError>;

    /// Events to queue on an active machine.
    async fn load_events(&mut self) -> Result<Vec<EventInformation<E>>, BoxError> {
        Ok(Vec::new())
    }

    /// Events to queue ahead of all others on an active machine.
    async fn load_priority_events(&mut self) -> Result<Vec<EventInformation<E>>, BoxError> {
        Ok(Vec::new())
    }
}

pub(crate) fn persistence_error<S: std::fmt::Debug>(error: BoxError) -> Error<S> {
    Error::Persistence(SharedError::from(error))
}

/// Saves into memory and loads back what was saved.
#[derive(Debug, Clone)]
pub struct InMemoryPersistence<S, E> {
    /// Saved machine state
    pub state: SavedState<S>,
    /// Saved queued events
    pub events: Vec<EventInformation<E>>,
    /// Saved queued priority events
    pub priority_events: Vec<EventInformation<E>>,
}

impl<S, E> Default for InMemoryPersistence<S, E> {
    fn default() -> Self {
        Self {
            state: SavedState::default(),
            events: Vec::new(),
            priority_events: Vec::new(),
        }
    }
}

impl<S, E> InMemoryPersistence<S, E> {
    /// Empty store; loading from it yields an uninitialized machine.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S: StateId, E: EventId> StateMachineSaver<S, E> for InMemoryPersistence<S, E> {
    async fn save_current_state(&mut self, current_state: Option<&S>) -> Result<(), BoxError> {
        self.state.current_state = current_state.cloned();
        Ok(())
    }

    async fn save_history_states(
        &mut self,
        history_states: &HashMap<S, S>,
    ) -> Result<(), BoxError> {
        self.state.history_states = history_states.clone();
        Ok(())
    }

    async fn save_events(&mut self, events: &[EventInformation<E>]) -> Result<(), BoxError> {
        self.events = events.to_vec();
        Ok(())
    }

    async fn save_priority_events(
        &mut self,
        events: &[EventInformation<E>],
    ) -> Result<(), BoxError> {
        self.priority_events = events.to_vec();
        Ok(())
    }
}

#[async_trait]
impl<S: StateId, E: EventId> StateMachineLoader<S, E> for InMemoryPersistence<S, E> {
    async fn load_current_state(&mut self) -> Result<Option<S>, BoxError> {
        Ok(self.state.current_state.clone())
    }

    async fn load_history_states(&mut self) -> Result<HashMap<S, S>, BoxError> {
        Ok(self.state.history_states.clone())
    }

    async fn load_events(&mut self) -> Result<Vec<EventInformation<E>>, BoxError> {
        Ok(self.events.clone())
    }

    async fn load_priority_events(&mut self) -> Result<Vec<EventInformation<E>>, BoxError> {
        Ok(self.priority_events.clone())
    }
}
