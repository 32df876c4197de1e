//! State machine processing its events on a dedicated worker thread.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::definition::{EventId, StateId};
use crate::error::Error;
use crate::extension::{Extension, ExtensionHost};
use crate::fsm::{
    StateMachine, TransitionCompletedEventArgs, TransitionEventArgs, TransitionExceptionEventArgs,
};
use crate::holder::EventArgument;
use crate::persistence::{
    persistence_error, EventInformation, SavedState, StateMachineLoader, StateMachineSaver,
};
use crate::report::StateMachineReport;

struct Queue<E> {
    events: VecDeque<EventInformation<E>>,
    // priority events always form the head of `events`
    priority_len: usize,
    stop_requested: bool,
    enter_initial_pending: bool,
}

impl<E> Queue<E> {
    fn push_back(&mut self, information: EventInformation<E>) {
        self.events.push_back(information);
    }

    fn push_front(&mut self, information: EventInformation<E>) {
        self.events.push_front(information);
        self.priority_len += 1;
    }

    fn pop_front(&mut self) -> Option<EventInformation<E>> {
        let information = self.events.pop_front()?;
        self.priority_len = self.priority_len.saturating_sub(1);
        Some(information)
    }
}

struct Shared<S: StateId, E: EventId> {
    machine: Mutex<StateMachine<S, E>>,
    queue: Mutex<Queue<E>>,
    signal: Condvar,
}

enum Work<E> {
    EnterInitialState,
    Fire(EventInformation<E>),
}

/// A [`StateMachine`] fed through an event queue.
///
/// Firing only appends to the queue and returns immediately; a single worker
/// thread takes the events one by one and executes the transitions. Events
/// fired before [`start`](Self::start) or after [`stop`](Self::stop) stay
/// queued until the worker runs again. The worker enters the initial state
/// before processing the first event.
///
/// Queries such as [`current_state`](Self::current_state) wait for the event
/// being processed, so they must not be called from guards or actions of the
/// same machine.
pub struct ActiveStateMachine<S: StateId, E: EventId> {
    name: String,
    shared: Arc<Shared<S, E>>,
    extensions: ExtensionHost<S, E>,
    worker: Option<JoinHandle<Result<(), Error<S>>>>,
}

impl<S: StateId, E: EventId> ActiveStateMachine<S, E> {
    /// Wrap `machine`; the worker is not started.
    pub fn new(machine: StateMachine<S, E>) -> Self {
        let name = machine.name().to_owned();
        let extensions = machine.extension_host().clone();
        Self {
            name,
            extensions,
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                queue: Mutex::new(Queue {
                    events: VecDeque::new(),
                    priority_len: 0,
                    stop_requested: false,
                    enter_initial_pending: false,
                }),
                signal: Condvar::new(),
            }),
            worker: None,
        }
    }

    /// Name given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the initial state; it is entered once the worker runs.
    pub fn initialize(&self, initial_state: S) -> Result<(), Error<S>> {
        self.shared.machine.lock().initialize(initial_state)
    }

    /// True once an initial state was set or loaded.
    pub fn is_initialized(&self) -> bool {
        self.shared.machine.lock().is_initialized()
    }

    /// True while the worker thread runs.
    ///
    /// A worker that ended on its own, by an unhandled failure or a panic, no
    /// longer counts; [`stop`](Self::stop) reports why it ended.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Queue `event` behind all pending events.
    pub fn fire(&self, event: E) {
        self.fire_with_argument(event, EventArgument::missing());
    }

    /// Queue `event` with `argument` behind all pending events.
    pub fn fire_with_argument(&self, event: E, argument: EventArgument) {
        self.shared
            .queue
            .lock()
            .push_back(EventInformation::with_argument(event.clone(), argument.clone()));
        self.shared.signal.notify_one();

        log::debug!("{}: queued {:?}", self.name, event);
        self.extensions
            .for_each(|extension| extension.event_queued(&event, &argument));
    }

    /// Queue `event` ahead of all pending events.
    ///
    /// An event that is already being processed is not overtaken.
    pub fn fire_priority(&self, event: E) {
        self.fire_priority_with_argument(event, EventArgument::missing());
    }

    /// Queue `event` with `argument` ahead of all pending events.
    pub fn fire_priority_with_argument(&self, event: E, argument: EventArgument) {
        self.shared
            .queue
            .lock()
            .push_front(EventInformation::with_argument(event.clone(), argument.clone()));
        self.shared.signal.notify_one();

        log::debug!("{}: queued {:?} with priority", self.name, event);
        self.extensions
            .for_each(|extension| extension.event_queued_with_priority(&event, &argument));
    }

    /// Number of events waiting to be processed.
    pub fn pending_events(&self) -> usize {
        self.shared.queue.lock().events.len()
    }

    /// Start the worker thread. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<(), Error<S>> {
        if self.worker.is_some() {
            return Ok(());
        }
        let entered = {
            let machine = self.shared.machine.lock();
            if !machine.is_initialized() {
                return Err(Error::NotInitialized);
            }
            machine.has_entered_initial_state()
        };
        {
            let mut queue = self.shared.queue.lock();
            queue.stop_requested = false;
            queue.enter_initial_pending = !entered;
        }

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || run(&shared))?;
        self.worker = Some(worker);

        log::info!("{}: worker started", self.name);
        self.extensions
            .for_each(|extension| extension.started_state_machine(&self.name));
        Ok(())
    }

    /// Stop the worker after the event being processed and wait for it.
    ///
    /// Pending events stay queued. Returns the error that ended the worker
    /// early, if any.
    pub fn stop(&mut self) -> Result<(), Error<S>> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.shared.queue.lock().stop_requested = true;
        self.shared.signal.notify_all();

        let outcome = match worker.join() {
            Ok(outcome) => outcome,
            Err(panic) => Err(Error::WorkerPanicked(panic_message(panic.as_ref()))),
        };

        log::info!("{}: worker stopped", self.name);
        self.extensions
            .for_each(|extension| extension.stopped_state_machine(&self.name));
        outcome
    }

    /// Active innermost state, `None` until the worker entered the initial state.
    pub fn current_state(&self) -> Option<S> {
        self.shared.machine.lock().current_state()
    }

    /// History state of every composite state with history left so far.
    pub fn history_states(&self) -> HashMap<S, S> {
        self.shared.machine.lock().history_states()
    }

    /// Hand the machine state and the queued events to `saver`.
    ///
    /// The snapshot is taken between two events.
    pub async fn save<P>(&self, saver: &mut P) -> Result<(), Error<S>>
    where
        P: StateMachineSaver<S, E> + ?Sized,
    {
        let (saved, priority_events, events) = {
            let machine = self.shared.machine.lock();
            let queue = self.shared.queue.lock();
            let mut priority: Vec<_> = queue.events.iter().cloned().collect();
            let normal = priority.split_off(queue.priority_len);
            (machine.saved_state(), priority, normal)
        };

        saver
            .save_current_state(saved.current_state.as_ref())
            .await
            .map_err(persistence_error)?;
        saver
            .save_history_states(&saved.history_states)
            .await
            .map_err(persistence_error)?;
        saver
            .save_events(&events)
            .await
            .map_err(persistence_error)?;
        saver
            .save_priority_events(&priority_events)
            .await
            .map_err(persistence_error)
    }

    /// Restore state and queued events from `loader` into an uninitialized
    /// machine.
    ///
    /// Loaded events are queued ahead of events fired since creation; loaded
    /// priority events ahead of everything.
    pub async fn load<L>(&self, loader: &mut L) -> Result<(), Error<S>>
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
        let events = loader.load_events().await.map_err(persistence_error)?;
        let priority_events = loader
            .load_priority_events()
            .await
            .map_err(persistence_error)?;

        self.shared.machine.lock().restore(SavedState {
            current_state,
            history_states,
        })?;

        let mut queue = self.shared.queue.lock();
        let priority_len = queue.priority_len;
        let fired_since_creation = queue.events.split_off(priority_len);
        queue.events.extend(events);
        queue.events.extend(fired_since_creation);
        for information in priority_events.into_iter().rev() {
            queue.push_front(information);
        }
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

    /// See [`StateMachine::on_transition_begin`].
    pub fn on_transition_begin<F>(&self, handler: F)
    where
        F: Fn(&TransitionEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.shared.machine.lock().on_transition_begin(handler);
    }

    /// See [`StateMachine::on_transition_completed`].
    pub fn on_transition_completed<F>(&self, handler: F)
    where
        F: Fn(&TransitionCompletedEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.shared.machine.lock().on_transition_completed(handler);
    }

    /// See [`StateMachine::on_transition_declined`].
    pub fn on_transition_declined<F>(&self, handler: F)
    where
        F: Fn(&TransitionEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.shared.machine.lock().on_transition_declined(handler);
    }

    /// See [`StateMachine::on_transition_exception`].
    pub fn on_transition_exception<F>(&self, handler: F)
    where
        F: Fn(&TransitionExceptionEventArgs<S, E>) + Send + Sync + 'static,
    {
        self.shared.machine.lock().on_transition_exception(handler);
    }

    /// Pass the definition to a report generator.
    pub fn report(&self, report: &mut dyn StateMachineReport<S, E>) {
        self.shared.machine.lock().report(report);
    }
}

impl<S: StateId, E: EventId> Drop for ActiveStateMachine<S, E> {
    fn drop(&mut self) {
        // the worker finishes the event in progress and exits on its own
        if self.worker.take().is_some() {
            self.shared.queue.lock().stop_requested = true;
            self.shared.signal.notify_all();
        }
    }
}

impl<S: StateId, E: EventId> Debug for ActiveStateMachine<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveStateMachine")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("pending_events", &self.pending_events())
            .finish()
    }
}

fn run<S: StateId, E: EventId>(shared: &Shared<S, E>) -> Result<(), Error<S>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    loop {
        let work = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.stop_requested {
                    return Ok(());
                }
                if queue.enter_initial_pending {
                    queue.enter_initial_pending = false;
                    break Work::EnterInitialState;
                }
                if let Some(information) = queue.pop_front() {
                    break Work::Fire(information);
                }
                shared.signal.wait(&mut queue);
            }
        };

        let mut machine = shared.machine.lock();
        let outcome = match work {
            Work::EnterInitialState => runtime.block_on(machine.enter_initial_state()),
            Work::Fire(EventInformation { event, argument }) => runtime
                .block_on(machine.fire_with_argument(event, argument))
                .map(|_| ()),
        };
        if let Err(error) = outcome {
            log::error!("{}: worker failed: {}", machine.name(), error);
            return Err(error);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_owned()
}
