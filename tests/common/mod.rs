#![allow(dead_code)]

use hierarchical_state_machine::{
    ActionHolder, Extension, GuardHolder, HistoryType, StateMachineBuilder, StateMachineDefinition,
    Transition, TransitionContext,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloorState {
    Healthy,
    OnFloor,
    DoorClosed,
    DoorOpen,
    Moving,
    MovingUp,
    MovingDown,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevatorEvent {
    GoUp,
    GoDown,
    OpenDoor,
    CloseDoor,
    Stop,
    ErrorOccurred,
    Reset,
}

/// Hardware stand-in shared with the actions.
#[derive(Debug, Default)]
pub struct Elevator {
    pub overloaded: AtomicBool,
    pub log: Mutex<Vec<String>>,
}

impl Elevator {
    pub fn set_overloaded(&self, overloaded: bool) {
        self.overloaded.store(overloaded, Ordering::SeqCst);
    }

    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

fn say(elevator: &Arc<Elevator>, message: &'static str) -> ActionHolder {
    let elevator = Arc::clone(elevator);
    ActionHolder::new(move || elevator.log.lock().push(message.to_string()))
        .with_description(message.replace(' ', "_"))
}

fn check_overload(elevator: &Arc<Elevator>) -> GuardHolder {
    let elevator = Arc::clone(elevator);
    GuardHolder::new(move || !elevator.overloaded.load(Ordering::SeqCst))
        .with_description("check_overload")
}

/// Healthy { OnFloor { DoorClosed, DoorOpen }, Moving { MovingUp, MovingDown } }, Error
pub fn elevator_definition(
    elevator: &Arc<Elevator>,
) -> StateMachineDefinition<FloorState, ElevatorEvent> {
    use ElevatorEvent::*;
    use FloorState::*;

    StateMachineBuilder::new()
        .hierarchy(Healthy, HistoryType::Deep, OnFloor, [Moving])
        .hierarchy(OnFloor, HistoryType::None, DoorClosed, [DoorOpen])
        .hierarchy(Moving, HistoryType::Shallow, MovingUp, [MovingDown])
        .state(Error)
        .entry(OnFloor, say(elevator, "announce floor"))
        .exit(OnFloor, say(elevator, "beep"))
        .entry(DoorOpen, say(elevator, "open door"))
        .exit(DoorOpen, say(elevator, "close door"))
        .entry(Error, say(elevator, "ring alarm"))
        .transition(
            OnFloor,
            GoUp,
            Transition::to(MovingUp).guard(check_overload(elevator)),
        )
        .transition(
            OnFloor,
            GoUp,
            Transition::internal()
                .action(say(elevator, "announce overload"))
                .action(say(elevator, "beep")),
        )
        .transition(
            OnFloor,
            GoDown,
            Transition::to(MovingDown).guard(check_overload(elevator)),
        )
        .transition(
            OnFloor,
            GoDown,
            Transition::internal()
                .action(say(elevator, "announce overload"))
                .action(say(elevator, "beep")),
        )
        .transition(OnFloor, OpenDoor, Transition::to(DoorOpen))
        .transition(DoorOpen, CloseDoor, Transition::to(DoorClosed))
        .transition(Moving, Stop, Transition::to(OnFloor))
        .transition(Healthy, ErrorOccurred, Transition::to(Error))
        .transition(Error, Reset, Transition::to(Healthy))
        .initial_state(OnFloor)
        .build()
        .expect("elevator definition is valid")
}

/// Collects the enter/exit trace of every transition.
#[derive(Debug, Default)]
pub struct Trace(pub Mutex<Vec<String>>);

impl Trace {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Extension<FloorState, ElevatorEvent> for Trace {
    fn entered_initial_state(
        &self,
        _state: &FloorState,
        context: &TransitionContext<'_, FloorState, ElevatorEvent>,
    ) {
        self.0.lock().push(context.describe_records());
    }

    fn fired_event(&self, context: &TransitionContext<'_, FloorState, ElevatorEvent>) {
        self.0.lock().push(context.describe_records());
    }
}
