//! # Hierarchical State Machine
//!
//! An event-driven hierarchical state machine engine with history states,
//! guarded transitions, observer extensions and two execution models.
//!
//! ## Features
//!
//! - 🏗️ **Hierarchical States**: nested states, transitions declared on any level, exit and
//!   entry actions executed along the path between source and target
//! - 🕰️ **History**: composite states re-enter their initial, last active (shallow) or
//!   innermost last active (deep) sub-state
//! - 🛡️ **Guards and Actions**: sync or async callables, with or without a typed event
//!   argument; failing callbacks are reported and never leave the machine half way
//! - 🧵 **Passive and Active Machines**: execute on the caller's task, or queue events for a
//!   dedicated worker thread
//! - 💾 **Save / Load**: current state, history and queued events through pluggable savers
//! - 📊 **PlantUML Export**: render the definition as a state diagram
//!
//! ## Quick Start
//!
//! ```rust
//! use hierarchical_state_machine::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! enum Door { Closed, Open }
//!
//! #[derive(Debug, Clone, PartialEq, Eq)]
//! enum Push { Open, Close }
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let definition = StateMachineBuilder::new()
//!     .transition(Door::Closed, Push::Open, Transition::to(Door::Open))
//!     .transition(Door::Open, Push::Close, Transition::to(Door::Closed))
//!     .entry(Door::Open, ActionHolder::new(|| println!("creak")))
//!     .initial_state(Door::Closed)
//!     .build()?;
//!
//! let mut door = definition.create_passive_state_machine("door");
//! door.enter_initial_state().await?;
//! door.fire(Push::Open).await?;
//! assert_eq!(door.current_state(), Some(Door::Open));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub use async_trait::async_trait;

mod active;
mod builder;
mod context;
mod definition;
mod error;
mod extension;
mod fsm;
mod holder;
mod persistence;
mod report;
mod state_logic;
mod transition_logic;

#[cfg(feature = "plantuml")]
mod plantuml;

pub use active::ActiveStateMachine;
pub use builder::{StateMachineBuilder, StateMachineDefinition, Transition};
pub use context::{Notifier, Record, RecordType, TransitionContext};
pub use definition::{
    EventId, HistoryType, StateDefinition, StateDefinitions, StateId, StateIndex,
    TransitionDefinition,
};
pub use error::{ArgumentError, BoxError, Error, Result, SharedError};
pub use extension::{Extension, ExtensionHost};
pub use fsm::{
    StateMachine, TransitionCompletedEventArgs, TransitionEventArgs, TransitionExceptionEventArgs,
};
pub use holder::{ActionHolder, ActionOutcome, EventArgument, GuardHolder, GuardOutcome, ANONYMOUS};
pub use persistence::{
    EventInformation, InMemoryPersistence, SavedState, StateMachineLoader, StateMachineSaver,
};
pub use report::{StateMachineReport, TransitionListReport};

#[cfg(feature = "plantuml")]
#[cfg_attr(docsrs, doc(cfg(feature = "plantuml")))]
pub use plantuml::PlantUmlReport;

pub mod prelude {
    //! Prelude module for convenient imports
    pub use crate::{
        ActionHolder, ActiveStateMachine, Error, EventArgument, Extension, GuardHolder,
        HistoryType, Result, StateMachine, StateMachineBuilder, Transition,
    };
    pub use async_trait::async_trait;
}
