//! Elevator state machine example
//!
//! The elevator is either healthy or in error:
//! - Healthy (deep history)
//!   - OnFloor: DoorClosed (initial) or DoorOpen
//!   - Moving (shallow history): MovingUp (initial) or MovingDown
//! - Error: entered on any failure, Reset returns to exactly where the
//!   elevator was thanks to the deep history of Healthy
//!
//! The example shows:
//! - Hierarchical states with entry and exit actions
//! - Guarded transitions with an internal fallback
//! - Extensions observing every state switch
//! - The active machine with a priority event
//! - PlantUML diagram export
//!
//! Run with `RUST_LOG=debug` to see the engine's log output.

use hierarchical_state_machine::prelude::*;
use hierarchical_state_machine::{PlantUmlReport, StateMachineDefinition, TransitionContext};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FloorState {
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
enum ElevatorEvent {
    GoUp,
    GoDown,
    OpenDoor,
    CloseDoor,
    Stop,
    ErrorOccurred,
    Reset,
}

#[derive(Debug, Default)]
struct Cabin {
    overloaded: AtomicBool,
    floor: AtomicU32,
}

/// Prints every state switch.
struct Display;

impl Extension<FloorState, ElevatorEvent> for Display {
    fn switched_state(&self, old_state: Option<&FloorState>, new_state: &FloorState) {
        match old_state {
            Some(old_state) => println!("📊 {:?} -> {:?}", old_state, new_state),
            None => println!("📊 Starting in {:?}", new_state),
        }
    }

    fn fired_event(&self, context: &TransitionContext<'_, FloorState, ElevatorEvent>) {
        if !context.records().is_empty() {
            println!("🧭 {}", context.describe_records());
        }
    }
}

fn announce_floor(cabin: &Arc<Cabin>) -> ActionHolder {
    let cabin = Arc::clone(cabin);
    ActionHolder::new(move || {
        println!("🔔 Arrived at floor {}", cabin.floor.load(Ordering::SeqCst));
    })
    .with_description("announce_floor")
}

fn check_overload(cabin: &Arc<Cabin>) -> GuardHolder {
    let cabin = Arc::clone(cabin);
    GuardHolder::new(move || !cabin.overloaded.load(Ordering::SeqCst))
        .with_description("check_overload")
}

fn travel(cabin: &Arc<Cabin>, up: bool) -> ActionHolder {
    let cabin = Arc::clone(cabin);
    let description = if up { "floor_up" } else { "floor_down" };
    ActionHolder::new(move || {
        if up {
            cabin.floor.fetch_add(1, Ordering::SeqCst);
        } else {
            let _ = cabin
                .floor
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |floor| floor.checked_sub(1));
        }
    })
    .with_description(description)
}

fn announce_overload() {
    println!("⚠️  Overload! Please leave the cabin");
}

fn beep() {
    println!("🔊 Beep");
}

fn open_door() {
    println!("🚪 Door opens");
}

fn close_door() {
    println!("🚪 Door closes");
}

fn ring_alarm() {
    println!("🚨 Alarm");
}

fn create_elevator(
    cabin: &Arc<Cabin>,
) -> std::result::Result<StateMachineDefinition<FloorState, ElevatorEvent>, Error<FloorState>> {
    use ElevatorEvent::*;
    use FloorState::*;

    StateMachineBuilder::new()
        .hierarchy(Healthy, HistoryType::Deep, OnFloor, [Moving])
        .hierarchy(OnFloor, HistoryType::None, DoorClosed, [DoorOpen])
        .hierarchy(Moving, HistoryType::Shallow, MovingUp, [MovingDown])
        .state(Error)
        .entry(OnFloor, announce_floor(cabin))
        .exit(OnFloor, ActionHolder::new(beep))
        .entry(DoorOpen, ActionHolder::new(open_door))
        .exit(DoorOpen, ActionHolder::new(close_door))
        .entry(MovingUp, travel(cabin, true))
        .entry(MovingDown, travel(cabin, false))
        .entry(Error, ActionHolder::new(ring_alarm))
        .transition(OnFloor, GoUp, Transition::to(MovingUp).guard(check_overload(cabin)))
        .transition(
            OnFloor,
            GoUp,
            Transition::internal()
                .action(ActionHolder::new(announce_overload))
                .action(ActionHolder::new(beep)),
        )
        .transition(
            OnFloor,
            GoDown,
            Transition::to(MovingDown).guard(check_overload(cabin)),
        )
        .transition(
            OnFloor,
            GoDown,
            Transition::internal()
                .action(ActionHolder::new(announce_overload))
                .action(ActionHolder::new(beep)),
        )
        .transition(OnFloor, OpenDoor, Transition::to(DoorOpen))
        .transition(DoorOpen, CloseDoor, Transition::to(DoorClosed))
        .transition(Moving, Stop, Transition::to(OnFloor))
        .transition(Healthy, ErrorOccurred, Transition::to(Error))
        .transition(Error, Reset, Transition::to(Healthy))
        .initial_state(OnFloor)
        .build()
}

async fn simulate_passive(
    definition: &StateMachineDefinition<FloorState, ElevatorEvent>,
    cabin: &Arc<Cabin>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("🎯 Passive elevator\n");

    let mut elevator = definition.create_passive_state_machine("passive-elevator");
    elevator.add_extension(Arc::new(Display));
    elevator.on_transition_declined(|args| {
        println!("🚫 {:?} ignored in {:?}", args.event, args.state);
    });
    elevator.enter_initial_state().await?;

    let events = vec![
        (ElevatorEvent::OpenDoor, "Passengers board"),
        (ElevatorEvent::CloseDoor, "Door closes"),
        (ElevatorEvent::GoUp, "Heading up"),
        (ElevatorEvent::Stop, "Stopping"),
        (ElevatorEvent::Stop, "Stopping again"),
        (ElevatorEvent::GoDown, "Heading down"),
        (ElevatorEvent::ErrorOccurred, "Motor fault while moving"),
        (ElevatorEvent::GoUp, "Trying to move during the fault"),
        (ElevatorEvent::Reset, "Technician resets the elevator"),
        (ElevatorEvent::Stop, "Stopping"),
    ];

    for (event, description) in events {
        println!("📋 {}", description);
        elevator.fire(event).await?;
        println!();
    }

    println!("📋 Too many passengers");
    cabin.overloaded.store(true, Ordering::SeqCst);
    elevator.fire(ElevatorEvent::GoUp).await?;
    cabin.overloaded.store(false, Ordering::SeqCst);
    println!(
        "📊 Still in {:?} at floor {}\n",
        elevator.current_state(),
        cabin.floor.load(Ordering::SeqCst)
    );

    Ok(())
}

async fn simulate_active(
    definition: &StateMachineDefinition<FloorState, ElevatorEvent>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("🎯 Active elevator\n");

    let mut elevator = definition.create_active_state_machine("active-elevator");
    elevator.add_extension(Arc::new(Display));

    elevator.fire(ElevatorEvent::GoUp);
    elevator.fire(ElevatorEvent::Stop);
    elevator.fire(ElevatorEvent::OpenDoor);
    // jumps the queue
    elevator.fire_priority(ElevatorEvent::ErrorOccurred);
    elevator.fire(ElevatorEvent::Reset);
    println!("📥 {} events queued", elevator.pending_events());

    elevator.start()?;
    while elevator.pending_events() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    elevator.stop()?;
    println!("📊 Final state: {:?}\n", elevator.current_state());

    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cabin = Arc::new(Cabin::default());
    let definition = create_elevator(&cabin)?;

    simulate_passive(&definition, &cabin).await?;
    simulate_active(&definition).await?;

    let mut report = PlantUmlReport::new();
    definition
        .create_passive_state_machine("elevator")
        .report(&mut report);
    println!("📄 PlantUML:\n{}", report.diagram());

    Ok(())
}
