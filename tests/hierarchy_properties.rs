mod common;

use common::{elevator_definition, Elevator, ElevatorEvent};
use hierarchical_state_machine::{Error, HistoryType, StateDefinitions, StateIndex};
use proptest::prelude::*;
use std::sync::Arc;

type States = StateDefinitions<u8, u8>;

fn chain(depth: u8) -> (States, Vec<StateIndex>) {
    let mut states = States::new();
    let indices: Vec<_> = (0..=depth).map(|id| states.add(id)).collect();
    for pair in indices.windows(2) {
        states.add_sub_state(pair[0], pair[1]).unwrap();
    }
    (states, indices)
}

fn elevator_event() -> impl Strategy<Value = ElevatorEvent> {
    prop_oneof![
        Just(ElevatorEvent::GoUp),
        Just(ElevatorEvent::GoDown),
        Just(ElevatorEvent::OpenDoor),
        Just(ElevatorEvent::CloseDoor),
        Just(ElevatorEvent::Stop),
        Just(ElevatorEvent::ErrorOccurred),
        Just(ElevatorEvent::Reset),
    ]
}

proptest! {
    #[test]
    fn test_levels_follow_depth_in_any_attach_order(
        order in (1u8..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let depth = order.len();
        let mut states = States::new();
        let indices: Vec<_> = (0..=depth as u8).map(|id| states.add(id)).collect();
        for parent in order {
            let parent = parent as usize;
            states.add_sub_state(indices[parent], indices[parent + 1]).unwrap();
        }

        for (position, index) in indices.iter().enumerate() {
            prop_assert_eq!(states.get(*index).level(), position + 1);
        }
        prop_assert_eq!(states.ancestors(indices[depth]).len(), depth + 1);
    }

    #[test]
    fn test_state_is_never_its_own_parent(id in any::<u8>()) {
        let mut states = States::new();
        let index = states.add(id);

        prop_assert!(matches!(
            states.add_sub_state(index, index),
            Err(Error::SelfSuperState(state)) if state == id
        ));
        prop_assert!(matches!(
            states.set_initial_sub_state(index, index),
            Err(Error::SelfInitialSubState(state)) if state == id
        ));
    }

    #[test]
    fn test_initial_sub_state_must_be_direct_child(
        depth in 2u8..6,
        pick in any::<prop::sample::Index>(),
    ) {
        let (mut states, indices) = chain(depth);
        let descendant = indices[2 + pick.index(indices.len() - 2)];

        prop_assert!(matches!(
            states.set_initial_sub_state(indices[0], descendant),
            Err(Error::NotADirectSubState { state: 0, .. })
        ), "expected NotADirectSubState for state 0");
        prop_assert!(states.set_initial_sub_state(indices[0], indices[1]).is_ok());
    }

    #[test]
    fn test_cycles_are_rejected(depth in 1u8..6, pick in any::<prop::sample::Index>()) {
        let (mut states, indices) = chain(depth);
        let descendant = indices[1 + pick.index(indices.len() - 1)];

        prop_assert!(matches!(
            states.add_sub_state(descendant, indices[0]),
            Err(Error::CyclicHierarchy(0))
        ));
        prop_assert_eq!(states.get(indices[0]).super_state(), None);
    }

    #[test]
    fn test_elevator_always_rests_in_leaf(
        events in prop::collection::vec(elevator_event(), 1..40),
        overloaded in any::<bool>(),
    ) {
        let elevator = Arc::new(Elevator::default());
        elevator.set_overloaded(overloaded);
        let mut fsm = elevator_definition(&elevator).create_passive_state_machine("elevator");

        tokio_test::block_on(async {
            fsm.enter_initial_state().await.unwrap();
            for event in events {
                fsm.fire(event).await.unwrap();
            }
        });

        let states = fsm.states();
        let current = fsm.current_state().unwrap();
        let index = states.require(&current).unwrap();
        prop_assert!(!states.get(index).has_sub_states());

        for (super_state, sub_state) in fsm.history_states() {
            let sub_index = states.require(&sub_state).unwrap();
            let super_index = states.require(&super_state).unwrap();
            match states.get(super_index).history_type() {
                HistoryType::None => prop_assert!(false, "{:?} keeps no history", super_state),
                HistoryType::Shallow => {
                    prop_assert_eq!(states.get(sub_index).super_state(), Some(super_index));
                }
                HistoryType::Deep => {
                    prop_assert!(states.is_ancestor_or_self(super_index, sub_index));
                    prop_assert!(!states.get(sub_index).has_sub_states());
                }
            }
        }
    }
}
