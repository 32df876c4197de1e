//! The passive hierarchical state machine.
//!
//! A [`StateMachine`] drives one instance through a shared, immutable
//! [`StateDefinitions`] arena. Everything runs on the caller's task: firing an
//! event evaluates guards, exits and enters states and executes actions before
//! the returned future completes. There is no internal locking; wrap the
//! machine in an [`ActiveStateMachine`](crate::ActiveStateMachine) to feed it
//! from several threads.
//!
//! # Life cycle
//! 1. [`StateMachine::initialize`] sets the initial state (or [`StateMachine::load`]
//!    restores a saved one).
//! 2. [`StateMachine::enter_initial_state`] executes the entry actions down to
//!    the innermost initial state.
//! 3. [`StateMachine::fire`] dispatches events.
//!
//! # Failures
//! Failing guards and actions never abort a transition. They are reported to
//! extensions and to the [`on_transition_exception`](StateMachine::on_transition_exception)
//! handlers. Without such a handler the failure is returned as
//! [`Error::UnhandledException`].

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::context::{Notifier, TransitionContext};
use crate::definition::{EventId, StateDefinitions, StateId, StateIndex};
use crate::error::{Error, SharedError};
use crate::extension::{Extension, ExtensionHost};
use crate::holder::EventArgument;
use crate::persistence::{persistence_error, SavedState, StateMachineLoader, StateMachineSaver};
use crate::report::StateMachineReport;
use crate::state_logic::{LastActiveStates, StateLogic};
use crate::transition_logic::{TransitionLogic, TransitionResult};

/// Payload of the transition begin and declined notifications.
#[derive(Debug, Clone)]
pub struct TransitionEventArgs<S, E> {
    /// State active when the event was fired
    pub state: S,
    /// Fired event, `None` while entering the initial state
    pub event: Option<E>,
    /// Argument of the fired event
    pub argument: EventArgument,
}

/// Payload of the transition completed notification.
#[derive(Debug, Clone)]
pub struct TransitionCompletedEventArgs<S, E> {
    /// State active when the event was fired
    pub state: S,
    /// Fired event
    pub event: Option<E>,
    /// Argument of the fired event
    pub argument: EventArgument,
    /// State after the transition
    pub new_state: S,
}

/// Payload of the transition exception notification.
#[derive(Debug, Clone)]
pub struct TransitionExceptionEventArgs<S, E> {
    /// State active when the event was fired
    pub state: S,
    /// Fired event
    pub event: Option<E>,
    /// Argument of the fired event
    pub argument: EventArgument,
    /// Failure of the guard or action
    pub error: SharedError,
}

type Handler<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Notifications<S, E> {
    begin: Vec<Handler<TransitionEventArgs<S, E>>>,
    completed: Vec<Handler<TransitionCompletedEventArgs<S, E>>>,
    declined: Vec<Handler<TransitionEventArgs<S, E>>>,
    exception: Vec<Handler<TransitionExceptionEventArgs<S, E>>>,
}

impl<S, E> Default for Notifications<S, E> {
    fn default() -> Self {
        Self {
            begin: Vec::new(),
            completed: Vec::new(),
            declined: Vec::new(),
            exception: Vec::new(),
        }
    }
}

fn event_args<S: StateId, E: EventId>(
    context: &TransitionContext<'_, S, E>,
) -> TransitionEventArgs<S, E> {
    TransitionEventArgs {
        state: context.state_id().clone(),
        event: context.event().cloned(),
        argument: context.argument().clone(),
    }
}

impl<S: StateId, E: EventId> Notifier<S, E> for Notifications<S, E> {
    fn on_transition_begin(&self, context: &TransitionContext<'_, S, E>) {
        if self.begin.is_empty() {
            return;
        }
        let args = event_args(context);
        self.begin.iter().for_each(|handler| handler(&args));
    }

    fn on_exception_thrown(
        &self,
        context: &TransitionContext<'_, S, E>,
        error: &SharedError,
    ) -> Result<(), Error<S>> {
        if self.exception.is_empty() {
            log::error!(
                "No handler for failure in state {:?}: {}",
                context.state_id(),
                error
            );
            return Err(Error::UnhandledException(error.clone()));
        }

        let args = TransitionExceptionEventArgs {
            state: context.state_id().clone(),
            event: context.event().cloned(),
            argument: context.argument().clone(),
            error: error.clone(),
        };
        self.exception.iter().for_each(|handler| handler(&args));
        Ok(())
    }
}

/// A hierarchical state machine executing on the caller's task.
pub struct StateMachine<S: StateId, E: EventId> {
    name: String,
    states: Arc<StateDefinitions<S, E>>,
    initial_state: Option<StateIndex>,
    current_state: Option<StateIndex>,
    last_active: LastActiveStates,
    extensions: ExtensionHost<S, E>,
    notifications: Notifications<S, E>,
}

impl<S: StateId, E: EventId> StateMachine<S, E> {
    /// Create an uninitialized machine over `states`.
    pub fn new(name: impl Into<String>, states: Arc<StateDefinitions<S, E>>) -> Self {
        Self {
            name: name.into(),
            states,
            initial_state: None,
            current_state: None,
            last_active: LastActiveStates::default(),
            extensions: ExtensionHost::default(),
            notifications: Notifications::default(),
        }
    }

    pub(crate) fn with_last_active(mut self, last_active: LastActiveStates) -> Self {
        self.last_active = last_active;
        self
    }

    /// Initialize with an index resolved against the same states.
    pub(crate) fn with_initial_state(mut self, initial_state: StateIndex) -> Self {
        log::info!(
            "{}: initialized with {:?}",
            self.name,
            self.states.id(initial_state)
        );
        self.initial_state = Some(initial_state);
        self
    }

    /// Name given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// States this machine runs through.
    pub fn states(&self) -> &StateDefinitions<S, E> {
        &self.states
    }

    /// Set the initial state. Nothing is executed until
    /// [`enter_initial_state`](Self::enter_initial_state).
    pub fn initialize(&mut self, initial_state: S) -> Result<(), Error<S>> {
        if self.initial_state.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let index = self.states.require(&initial_state)?;
        self.initial_state = Some(index);

        log::info!("{}: initialized with {:?}", self.name, initial_state);
        self.extensions
            .for_each(|extension| extension.initialized_state_machine(&self.name, &initial_state));
        Ok(())
    }

    /// True once an initial state was set or loaded.
    pub fn is_initialized(&self) -> bool {
        self.initial_state.is_some()
    }

    /// True once the machine settled into a state.
    pub fn has_entered_initial_state(&self) -> bool {
        self.current_state.is_some()
    }

    /// Enter the initial state, its super-states and its initial sub-states.
    ///
    /// Super-states are entered outermost first; below the initial state the
    /// history of each composite state decides which sub-state is entered.
    pub async fn enter_initial_state(&mut self) -> Result<(), Error<S>> {
        let initial = self.initial_state.ok_or(Error::NotInitialized)?;
        if self.current_state.is_some() {
            return Err(Error::InitialStateAlreadyEntered);
        }

        let initial_id = self.states.id(initial).clone();
        self.extensions
            .for_each(|extension| extension.entering_initial_state(&initial_id));

        let mut context = TransitionContext::new(
            initial,
            initial_id.clone(),
            None,
            EventArgument::missing(),
            &self.notifications,
        );
        let state_logic = StateLogic::new(&self.states, &self.extensions);
        for state in self.states.ancestors(initial).into_iter().rev() {
            state_logic.entry(state, &mut context).await?;
        }
        let leaf = state_logic
            .enter_by_history(initial, &mut context, &self.last_active)
            .await?;

        self.current_state = Some(leaf);
        let leaf_id = self.states.id(leaf);
        log::info!(
            "{}: entered initial state {:?} ({})",
            self.name,
            leaf_id,
            context.describe_records()
        );
        self.extensions.for_each(|extension| {
            extension.entered_initial_state(leaf_id, &context);
            extension.switched_state(None, leaf_id);
        });
        Ok(())
    }

    /// Fire `event` without argument. See [`fire_with_argument`](Self::fire_with_argument).
    pub async fn fire(&mut self, event: E) -> Result<bool, Error<S>> {
        self.fire_with_argument(event, EventArgument::missing()).await
    }

    /// Fire `event` and wait until the resulting transition completed.
    ///
    /// The event is looked up in the current state and then in its
    /// super-states; the first candidate whose guard passes fires. Returns
    /// whether a transition fired. A declined event leaves the state unchanged.
    pub async fn fire_with_argument(
        &mut self,
        event: E,
        argument: EventArgument,
    ) -> Result<bool, Error<S>> {
        if self.initial_state.is_none() {
            return Err(Error::NotInitialized);
        }
        let current = self.current_state.ok_or(Error::InitialStateNotEntered)?;

        let (mut event, mut argument) = (event, argument);
        self.extensions
            .for_each(|extension| extension.firing_event(&mut event, &mut argument));

        let mut context = TransitionContext::new(
            current,
            self.states.id(current).clone(),
            Some(event.clone()),
            argument,
            &self.notifications,
        );
        let logic = TransitionLogic::new(&self.states, &self.extensions);

        let mut result = TransitionResult::NotFired;
        'dispatch: for state in self.states.ancestors(current) {
            let Some(candidates) = self.states.get(state).transitions_for(&event) else {
                continue;
            };
            for transition in candidates {
                result = logic
                    .fire(transition, &mut context, &mut self.last_active)
                    .await?;
                if result.is_fired() {
                    break 'dispatch;
                }
            }
        }

        let Some(new_state) = result.new_state() else {
            log::debug!(
                "{}: {:?} declined in {:?}",
                self.name,
                event,
                context.state_id()
            );
            let args = event_args(&context);
            self.notifications
                .declined
                .iter()
                .for_each(|handler| handler(&args));
            return Ok(false);
        };

        self.current_state = Some(new_state);
        let old_id = context.state_id();
        let new_id = self.states.id(new_state);
        log::debug!(
            "{}: {:?} -> {:?} on {:?} ({})",
            self.name,
            old_id,
            new_id,
            event,
            context.describe_records()
        );
        self.extensions.for_each(|extension| {
            extension.switched_state(Some(old_id), new_id);
            extension.fired_event(&context);
        });

        if !self.notifications.completed.is_empty() {
            let args = TransitionCompletedEventArgs {
                state: old_id.clone(),
                event: Some(event),
                argument: context.argument().clone(),
                new_state: new_id.clone(),
            };
            self.notifications
                .completed
                .iter()
                .for_each(|handler| handler(&args));
        }
        Ok(true)
    }

    /// Active innermost state, `None` until the initial state was entered.
    pub fn current_state(&self) -> Option<S> {
        self.current_state.map(|index| self.states.id(index).clone())
    }

    /// History state of every composite state with history left so far.
    ///
    /// Shallow states map to a direct sub-state, deep states to the innermost
    /// state they were left from.
    pub fn history_states(&self) -> HashMap<S, S> {
        self.last_active.to_ids(&self.states)
    }

    /// Snapshot of the current state and the history states.
    pub fn saved_state(&self) -> SavedState<S> {
        SavedState {
            current_state: self.current_state(),
            history_states: self.history_states(),
        }
    }

    /// Hand the current state and the history states to `saver`.
    pub async fn save<P>(&self, saver: &mut P) -> Result<(), Error<S>>
    where
        P: StateMachineSaver<S, E> + ?Sized,
    {
        let saved = self.saved_state();
        saver
            .save_current_state(saved.current_state.as_ref())
            .await
            .map_err(persistence_error)?;
        saver
            .save_history_states(&saved.history_states)
            .await
            .map_err(persistence_error)
    }

    /// Restore state from `loader` into an uninitialized machine.
    pub async fn load<L>(&mut self, loader: &mut L) -> Result<(), Error<S>>
    where
        L: StateMachineLoader<S, E> + ?Sized,
    {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }
        let current_state = loader
            .load_current_state()
            .await
            .map_err(persistence_error)?;
        let history_states = loader
            .load_history_states()
            .await
            .map_err(persistence_error)?;
        self.restore(SavedState {
            current_state,
            history_states,
        })
    }

    /// Restore a snapshot into an uninitialized machine.
    ///
    /// A restored current state counts as both initialized and entered; no
    /// entry actions run. Nothing changes if the snapshot refers to unknown
    /// states or records a history state its composite state cannot keep.
    pub fn restore(&mut self, saved: SavedState<S>) -> Result<(), Error<S>> {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }
        let last_active = LastActiveStates::from_ids(&self.states, &saved.history_states)?;
        let current = saved
            .current_state
            .as_ref()
            .map(|state| self.states.require(state))
            .transpose()?;

        self.last_active = last_active;
        self.initial_state = current;
        self.current_state = current;

        log::info!(
            "{}: loaded {:?} with {} history states",
            self.name,
            saved.current_state,
            saved.history_states.len()
        );
        self.extensions.for_each(|extension| {
            extension.loaded(saved.current_state.as_ref(), &saved.history_states)
        });
        Ok(())
    }

    /// Register an extension behind the existing ones.
    pub fn add_extension(&self, extension: Arc<dyn Extension<S, E>>) {
        self.extensions.add(extension);
    }

    /// Remove every extension.
    pub fn clear_extensions(&self) {
        self.extensions.clear();
    }

    pub(crate) fn extension_host(&self) -> &ExtensionHost<S, E> {
        &self.extensions
    }

    /// Called when a transition passed its guard and starts executing.
    pub fn on_transition_begin<F>(&mut self, handler: F)
    where
        F: Fn(&TransitionEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.notifications.begin.push(Box::new(handler));
    }

    /// Called after a transition completed.
    pub fn on_transition_completed<F>(&mut self, handler: F)
    where
        F: Fn(&TransitionCompletedEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.notifications.completed.push(Box::new(handler));
    }

    /// Called when no transition fired for an event.
    pub fn on_transition_declined<F>(&mut self, handler: F)
    where
        F: Fn(&TransitionEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.notifications.declined.push(Box::new(handler));
    }

    /// Called for every failing guard or action.
    ///
    /// Registering at least one handler turns such failures into notifications;
    /// without one they abort the event with [`Error::UnhandledException`].
    pub fn on_transition_exception<F>(&mut self, handler: F)
    where
        F: Fn(&TransitionExceptionEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.notifications.exception.push(Box::new(handler));
    }

    /// Pass the definition to a report generator.
    pub fn report(&self, report: &mut dyn StateMachineReport<S, E>) {
        let initial = self.initial_state.map(|index| self.states.id(index));
        report.report(&self.name, &self.states, initial);
    }
}

impl<S: StateId, E: EventId> Debug for StateMachine<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("current_state", &self.current_state())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{HistoryType, TransitionDefinition};
    use crate::holder::{ActionHolder, GuardHolder};
    use crate::persistence::InMemoryPersistence;
    use parking_lot::Mutex;

    // Test state enum
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum TestState {
        Root,
        Menu,
        Settings,
        Display,
        Volume,
    }

    // Test event enum
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestEvent {
        Enter,
        Back,
        Up,
        Select,
        Timeout,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("speaker broken")]
    struct SpeakerBroken;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn note(journal: &Journal, entry: &'static str) -> ActionHolder {
        let journal = Arc::clone(journal);
        ActionHolder::new(move || journal.lock().push(entry.to_string()))
    }

    /// Root { Menu, Settings { Display, Volume } }
    ///
    /// Settings keeps shallow history.
    fn create_test_states(journal: &Journal) -> Arc<StateDefinitions<TestState, TestEvent>> {
        let mut states = StateDefinitions::new();
        let root = states.add(TestState::Root);
        let menu = states.add(TestState::Menu);
        let settings = states.add(TestState::Settings);
        let display = states.add(TestState::Display);
        let volume = states.add(TestState::Volume);
        states.add_sub_state(root, menu).unwrap();
        states.add_sub_state(root, settings).unwrap();
        states.add_sub_state(settings, display).unwrap();
        states.add_sub_state(settings, volume).unwrap();
        states.set_initial_sub_state(root, menu).unwrap();
        states.set_initial_sub_state(settings, display).unwrap();
        states.set_history_type(settings, HistoryType::Shallow);

        for (index, entry, exit) in [
            (root, "enter Root", "exit Root"),
            (menu, "enter Menu", "exit Menu"),
            (settings, "enter Settings", "exit Settings"),
            (display, "enter Display", "exit Display"),
            (volume, "enter Volume", "exit Volume"),
        ] {
            states.add_entry_action(index, note(journal, entry));
            states.add_exit_action(index, note(journal, exit));
        }

        let transitions = [
            (menu, TestEvent::Select, Some(settings)),
            (settings, TestEvent::Back, Some(menu)),
            (display, TestEvent::Select, Some(volume)),
            (volume, TestEvent::Select, Some(display)),
            (root, TestEvent::Enter, Some(menu)),
        ];
        for (source, event, target) in transitions {
            states
                .add_transition(source, TransitionDefinition::new(event, target))
                .unwrap();
        }
        states
            .add_transition(
                volume,
                TransitionDefinition::new(TestEvent::Up, None)
                    .with_action(note(journal, "louder")),
            )
            .unwrap();

        states.validate().unwrap();
        Arc::new(states)
    }

    async fn create_test_fsm(journal: &Journal) -> StateMachine<TestState, TestEvent> {
        let mut fsm = StateMachine::new("menu", create_test_states(journal));
        fsm.initialize(TestState::Root).unwrap();
        fsm.enter_initial_state().await.unwrap();
        journal.lock().clear();
        fsm
    }

    #[tokio::test]
    async fn test_initialization() {
        let journal = Journal::default();
        let mut fsm = StateMachine::new("menu", create_test_states(&journal));

        assert!(!fsm.is_initialized());
        assert_eq!(fsm.current_state(), None);
        assert!(matches!(
            fsm.enter_initial_state().await,
            Err(Error::NotInitialized)
        ));

        fsm.initialize(TestState::Root).unwrap();
        assert!(matches!(
            fsm.initialize(TestState::Menu),
            Err(Error::AlreadyInitialized)
        ));
        assert!(fsm.is_initialized());
        assert!(!fsm.has_entered_initial_state());

        fsm.enter_initial_state().await.unwrap();
        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert_eq!(*journal.lock(), vec!["enter Root", "enter Menu"]);
        assert!(matches!(
            fsm.enter_initial_state().await,
            Err(Error::InitialStateAlreadyEntered)
        ));
    }

    #[tokio::test]
    async fn test_initial_sub_state_enters_super_states_first() {
        let journal = Journal::default();
        let mut fsm = StateMachine::new("menu", create_test_states(&journal));
        fsm.initialize(TestState::Settings).unwrap();
        fsm.enter_initial_state().await.unwrap();

        assert_eq!(fsm.current_state(), Some(TestState::Display));
        assert_eq!(
            *journal.lock(),
            vec!["enter Root", "enter Settings", "enter Display"]
        );
    }

    #[tokio::test]
    async fn test_fire_requires_entered_initial_state() {
        let journal = Journal::default();
        let mut fsm = StateMachine::new("menu", create_test_states(&journal));
        assert!(matches!(
            fsm.fire(TestEvent::Select).await,
            Err(Error::NotInitialized)
        ));

        fsm.initialize(TestState::Root).unwrap();
        assert!(matches!(
            fsm.fire(TestEvent::Select).await,
            Err(Error::InitialStateNotEntered)
        ));
    }

    #[tokio::test]
    async fn test_basic_transitions() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;

        assert!(fsm.fire(TestEvent::Select).await.unwrap());
        assert_eq!(fsm.current_state(), Some(TestState::Display));
        assert_eq!(
            *journal.lock(),
            vec!["exit Menu", "enter Settings", "enter Display"]
        );

        journal.lock().clear();
        assert!(fsm.fire(TestEvent::Back).await.unwrap());
        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert_eq!(
            *journal.lock(),
            vec!["exit Display", "exit Settings", "enter Menu"]
        );
    }

    #[tokio::test]
    async fn test_super_state_handles_event() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        fsm.fire(TestEvent::Select).await.unwrap();
        journal.lock().clear();

        // declared on Root, fired while in Display; Root itself stays active
        fsm.fire(TestEvent::Enter).await.unwrap();
        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert_eq!(
            *journal.lock(),
            vec!["exit Display", "exit Settings", "enter Menu"]
        );
    }

    #[tokio::test]
    async fn test_internal_transition_keeps_state() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        fsm.fire(TestEvent::Select).await.unwrap();
        fsm.fire(TestEvent::Select).await.unwrap();
        journal.lock().clear();

        assert!(fsm.fire(TestEvent::Up).await.unwrap());
        assert_eq!(fsm.current_state(), Some(TestState::Volume));
        assert_eq!(*journal.lock(), vec!["louder"]);
    }

    #[tokio::test]
    async fn test_shallow_history() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        fsm.fire(TestEvent::Select).await.unwrap(); // Menu -> Display
        fsm.fire(TestEvent::Select).await.unwrap(); // Display -> Volume
        fsm.fire(TestEvent::Back).await.unwrap(); // Settings -> Menu

        assert_eq!(
            fsm.history_states().get(&TestState::Settings),
            Some(&TestState::Volume)
        );

        fsm.fire(TestEvent::Select).await.unwrap();
        assert_eq!(fsm.current_state(), Some(TestState::Volume));
    }

    #[tokio::test]
    async fn test_declined_event() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        let declined = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&declined);
        fsm.on_transition_declined(move |args| sink.lock().push(args.clone()));

        assert!(!fsm.fire(TestEvent::Timeout).await.unwrap());

        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert!(journal.lock().is_empty());
        let declined = declined.lock();
        assert_eq!(declined.len(), 1);
        assert_eq!(declined[0].state, TestState::Menu);
        assert_eq!(declined[0].event, Some(TestEvent::Timeout));
    }

    #[tokio::test]
    async fn test_completed_notification() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (begins, completions) = (Arc::clone(&seen), Arc::clone(&seen));
        fsm.on_transition_begin(move |args| {
            begins.lock().push(format!("begin {:?}", args.state));
        });
        fsm.on_transition_completed(move |args| {
            completions
                .lock()
                .push(format!("{:?} -> {:?}", args.state, args.new_state));
        });

        fsm.fire(TestEvent::Select).await.unwrap();

        assert_eq!(*seen.lock(), vec!["begin Menu", "Menu -> Display"]);
    }

    #[tokio::test]
    async fn test_guard_fall_through_to_super_state() {
        let journal = Journal::default();
        let mut states = StateDefinitions::new();
        let root = states.add(TestState::Root);
        let menu = states.add(TestState::Menu);
        let settings = states.add(TestState::Settings);
        states.add_sub_state(root, menu).unwrap();
        states.add_sub_state(root, settings).unwrap();
        states.set_initial_sub_state(root, menu).unwrap();
        states
            .add_transition(
                menu,
                TransitionDefinition::new(TestEvent::Select, Some(settings))
                    .with_guard(GuardHolder::new(|| false)),
            )
            .unwrap();
        states
            .add_transition(
                root,
                TransitionDefinition::new(TestEvent::Select, None)
                    .with_action(note(&journal, "root handled")),
            )
            .unwrap();

        let mut fsm = StateMachine::new("fallthrough", Arc::new(states));
        fsm.initialize(TestState::Menu).unwrap();
        fsm.enter_initial_state().await.unwrap();
        journal.lock().clear();

        assert!(fsm.fire(TestEvent::Select).await.unwrap());
        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert_eq!(*journal.lock(), vec!["root handled"]);
    }

    #[tokio::test]
    async fn test_guarded_candidates_in_order() {
        let mut states = StateDefinitions::new();
        let menu = states.add(TestState::Menu);
        let display = states.add(TestState::Display);
        let volume = states.add(TestState::Volume);
        states
            .add_transition(
                menu,
                TransitionDefinition::new(TestEvent::Select, Some(display))
                    .with_guard(GuardHolder::with_argument(|level: &u8| *level < 5)),
            )
            .unwrap();
        states
            .add_transition(menu, TransitionDefinition::new(TestEvent::Select, Some(volume)))
            .unwrap();

        let states = Arc::new(states);
        for (level, expected) in [(2u8, TestState::Display), (9u8, TestState::Volume)] {
            let mut fsm = StateMachine::new("candidates", Arc::clone(&states));
            fsm.initialize(TestState::Menu).unwrap();
            fsm.enter_initial_state().await.unwrap();
            fsm.fire_with_argument(TestEvent::Select, EventArgument::new(level))
                .await
                .unwrap();
            assert_eq!(fsm.current_state(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_failing_guard_tries_next_candidate() {
        let mut states = StateDefinitions::new();
        let menu = states.add(TestState::Menu);
        let display = states.add(TestState::Display);
        let volume = states.add(TestState::Volume);
        states
            .add_transition(
                menu,
                TransitionDefinition::new(TestEvent::Select, Some(display))
                    .with_guard(GuardHolder::new(|| Err::<bool, _>(SpeakerBroken))),
            )
            .unwrap();
        states
            .add_transition(menu, TransitionDefinition::new(TestEvent::Select, Some(volume)))
            .unwrap();

        let mut fsm = StateMachine::new("candidates", Arc::new(states));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        fsm.on_transition_exception(move |args| sink.lock().push(args.error.to_string()));
        fsm.initialize(TestState::Menu).unwrap();
        fsm.enter_initial_state().await.unwrap();

        assert!(fsm.fire(TestEvent::Select).await.unwrap());
        assert_eq!(fsm.current_state(), Some(TestState::Volume));
        assert_eq!(*failures.lock(), vec!["speaker broken"]);
    }

    struct Order(Journal);

    impl Extension<TestState, TestEvent> for Order {
        fn executing_transition(
            &self,
            _transition: &TransitionDefinition<TestEvent>,
            _context: &TransitionContext<'_, TestState, TestEvent>,
        ) {
            self.0.lock().push("executing".to_string());
        }

        fn executed_transition(
            &self,
            _transition: &TransitionDefinition<TestEvent>,
            _context: &TransitionContext<'_, TestState, TestEvent>,
        ) {
            self.0.lock().push("executed".to_string());
        }

        fn switched_state(&self, old_state: Option<&TestState>, new_state: &TestState) {
            self.0
                .lock()
                .push(format!("switched {:?} -> {:?}", old_state, new_state));
        }

        fn fired_event(&self, _context: &TransitionContext<'_, TestState, TestEvent>) {
            self.0.lock().push("fired".to_string());
        }
    }

    #[tokio::test]
    async fn test_notification_order() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        fsm.add_extension(Arc::new(Order(Arc::clone(&journal))));
        let sink = Arc::clone(&journal);
        fsm.on_transition_completed(move |_args| sink.lock().push("completed".to_string()));

        fsm.fire(TestEvent::Select).await.unwrap();

        assert_eq!(
            *journal.lock(),
            vec![
                "executing",
                "exit Menu",
                "enter Settings",
                "enter Display",
                "executed",
                "switched Some(Menu) -> Display",
                "fired",
                "completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_unhandled_exception_without_listener() {
        let mut states = StateDefinitions::new();
        let menu = states.add(TestState::Menu);
        let volume = states.add(TestState::Volume);
        states
            .add_transition(
                menu,
                TransitionDefinition::new(TestEvent::Up, Some(volume))
                    .with_action(ActionHolder::new(|| Err::<(), _>(SpeakerBroken))),
            )
            .unwrap();
        let states = Arc::new(states);

        let mut fsm = StateMachine::new("strict", Arc::clone(&states));
        fsm.initialize(TestState::Menu).unwrap();
        fsm.enter_initial_state().await.unwrap();
        match fsm.fire(TestEvent::Up).await {
            Err(Error::UnhandledException(error)) => {
                assert_eq!(error.to_string(), "speaker broken")
            }
            other => panic!("Expected UnhandledException, got {:?}", other),
        }
        assert_eq!(fsm.current_state(), Some(TestState::Menu));

        // with a listener the failure is reported and the transition completes
        let mut fsm = StateMachine::new("tolerant", states);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        fsm.on_transition_exception(move |args| sink.lock().push(args.error.to_string()));
        fsm.initialize(TestState::Menu).unwrap();
        fsm.enter_initial_state().await.unwrap();

        assert!(fsm.fire(TestEvent::Up).await.unwrap());
        assert_eq!(fsm.current_state(), Some(TestState::Volume));
        assert_eq!(*failures.lock(), vec!["speaker broken"]);
    }

    struct Rewriter(Journal);

    impl Extension<TestState, TestEvent> for Rewriter {
        fn firing_event(&self, event: &mut TestEvent, _argument: &mut EventArgument) {
            if *event == TestEvent::Timeout {
                *event = TestEvent::Select;
            }
        }

        fn switched_state(&self, old_state: Option<&TestState>, new_state: &TestState) {
            self.0
                .lock()
                .push(format!("switched {:?} -> {:?}", old_state, new_state));
        }

        fn fired_event(&self, context: &TransitionContext<'_, TestState, TestEvent>) {
            self.0.lock().push(format!("fired {:?}", context.event()));
        }
    }

    #[tokio::test]
    async fn test_extension_rewrites_event() {
        let journal = Journal::default();
        let seen = Journal::default();
        let mut fsm = StateMachine::new("menu", create_test_states(&journal));
        fsm.add_extension(Arc::new(Rewriter(Arc::clone(&seen))));
        fsm.initialize(TestState::Root).unwrap();
        fsm.enter_initial_state().await.unwrap();

        fsm.fire(TestEvent::Timeout).await.unwrap();

        assert_eq!(fsm.current_state(), Some(TestState::Display));
        assert_eq!(
            *seen.lock(),
            vec![
                "switched None -> Menu",
                "switched Some(Menu) -> Display",
                "fired Some(Select)"
            ]
        );

        fsm.clear_extensions();
        fsm.fire(TestEvent::Timeout).await.unwrap();
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let journal = Journal::default();
        let mut fsm = create_test_fsm(&journal).await;
        fsm.fire(TestEvent::Select).await.unwrap();
        fsm.fire(TestEvent::Select).await.unwrap();
        fsm.fire(TestEvent::Back).await.unwrap();

        let mut store = InMemoryPersistence::new();
        fsm.save(&mut store).await.unwrap();

        let mut restored = StateMachine::new("menu", Arc::clone(&fsm.states));
        restored.load(&mut store).await.unwrap();
        assert_eq!(restored.current_state(), fsm.current_state());
        assert_eq!(restored.history_states(), fsm.history_states());
        assert!(restored.has_entered_initial_state());
        assert!(matches!(
            restored.load(&mut store).await,
            Err(Error::AlreadyInitialized)
        ));

        // history survives the round trip
        journal.lock().clear();
        restored.fire(TestEvent::Select).await.unwrap();
        assert_eq!(restored.current_state(), Some(TestState::Volume));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_history() {
        let journal = Journal::default();
        let mut fsm = StateMachine::new("menu", create_test_states(&journal));
        let mut store = InMemoryPersistence::<TestState, TestEvent>::new();
        store.state.current_state = Some(TestState::Menu);
        store
            .state
            .history_states
            .insert(TestState::Root, TestState::Volume);

        assert!(matches!(
            fsm.load(&mut store).await,
            Err(Error::InvalidHistoryState {
                super_state: TestState::Root,
                child: TestState::Volume
            })
        ));
        assert!(!fsm.is_initialized());
    }
}
