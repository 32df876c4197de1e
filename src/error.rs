//! Error types for the state machine

use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a guard, an action or a persistence backend.
///
/// Shared so that the very same failure can be handed to extensions, recorded on
/// the transition context and forwarded to exception listeners.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed error accepted from user code and persistence backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for state machine operations
pub type Result<T, S> = std::result::Result<T, Error<S>>;

/// Errors that can occur during state machine operations
#[derive(Error, Debug)]
pub enum Error<S: Debug> {
    /// State machine has not been initialized
    #[error("State machine not initialized")]
    NotInitialized,

    /// `initialize` or `load` was called on an initialized machine
    #[error("State machine is already initialized")]
    AlreadyInitialized,

    /// Events can only be fired after the initial state was entered
    #[error("Initial state has not been entered yet")]
    InitialStateNotEntered,

    /// The initial state is entered at most once
    #[error("Initial state was already entered")]
    InitialStateAlreadyEntered,

    /// A state was made its own super-state
    #[error("State {0:?} cannot be its own super-state")]
    SelfSuperState(S),

    /// A state was made its own initial sub-state
    #[error("State {0:?} cannot be its own initial sub-state")]
    SelfInitialSubState(S),

    /// The initial sub-state must be a direct child
    #[error("State {initial:?} is not a direct sub-state of {state:?}")]
    NotADirectSubState {
        /// Composite state
        state: S,
        /// Rejected initial sub-state
        initial: S,
    },

    /// A state can only belong to one super-state
    #[error("State {state:?} is already a sub-state of {super_state:?}")]
    AlreadyHasSuperState {
        /// Sub-state being attached
        state: S,
        /// Its existing super-state
        super_state: S,
    },

    /// Attaching the sub-state would make a state its own ancestor
    #[error("State {0:?} cannot be a sub-state of one of its descendants")]
    CyclicHierarchy(S),

    /// A composite state has no initial sub-state to enter
    #[error("State {0:?} has sub-states but no initial sub-state")]
    MissingInitialSubState(S),

    /// Attempted to use a state that is not part of the definition
    #[error("State {0:?} not registered")]
    StateNotRegistered(S),

    /// A transition was attached to a second source state
    #[error("Source of transition on event {event} is already set")]
    TransitionSourceAlreadySet {
        /// Debug rendering of the event id
        event: String,
    },

    /// A transition was fired that is not attached to any state
    #[error("Transition on event {event} is not attached to a state")]
    TransitionNotAttached {
        /// Debug rendering of the event id
        event: String,
    },

    /// A transition was declared after the unguarded fallback for its event
    #[error("Transition on event {event} in state {state:?} follows a transition without guard")]
    UnreachableTransition {
        /// State the transition was declared in
        state: S,
        /// Debug rendering of the event id
        event: String,
    },

    /// Loaded history does not match the state hierarchy
    #[error("State {super_state:?} cannot keep {child:?} as history state")]
    InvalidHistoryState {
        /// Composite state of the mapping
        super_state: S,
        /// Recorded last active sub-state
        child: S,
    },

    /// A callback failed and nobody subscribed to transition exceptions
    #[error("Unhandled exception during transition: {0}")]
    UnhandledException(SharedError),

    /// Saver or loader failure
    #[error("Persistence failed: {0}")]
    Persistence(SharedError),

    /// The worker thread of an active machine could not be started
    #[error("Failed to start worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// The worker thread of an active machine panicked
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Raised when an event argument does not match the parameter type of a
/// guard or action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot pass argument of type {actual} to {holder}: expected {expected}")]
pub struct ArgumentError {
    /// Parameter type declared by the holder
    pub expected: &'static str,
    /// Type of the argument that was passed
    pub actual: &'static str,
    /// Description of the holder
    pub holder: String,
}
