//! Read-only traversal of a machine definition for report generators.

use crate::definition::{EventId, StateDefinitions, StateId};

/// Generates a report about a machine definition.
///
/// Implementations walk the arena starting at [`StateDefinitions::roots`] and
/// recurse through [`StateDefinition::sub_states`](crate::StateDefinition::sub_states).
pub trait StateMachineReport<S: StateId, E: EventId> {
    /// Called once with the machine's name, its states and its initial state.
    fn report(&mut self, name: &str, states: &StateDefinitions<S, E>, initial_state: Option<&S>);
}

/// Flat line-per-transition summary, mainly useful in logs and tests.
///
/// Each line reads `source -event-> target [guard] / action, action`, with
/// `internal` in place of the target for internal transitions.
#[derive(Debug, Default)]
pub struct TransitionListReport {
    lines: Vec<String>,
}

impl TransitionListReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines produced by the last call to [`report`](StateMachineReport::report).
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl<S: StateId, E: EventId> StateMachineReport<S, E> for TransitionListReport {
    fn report(&mut self, _name: &str, states: &StateDefinitions<S, E>, _initial_state: Option<&S>) {
        self.lines.clear();
        for state in states.iter() {
            for (event, candidates) in state.transitions() {
                for transition in candidates {
                    let mut line = match transition.target() {
                        Some(target) => {
                            format!("{:?} -{:?}-> {:?}", state.id(), event, states.id(target))
                        }
                        None => format!("{:?} -{:?}-> internal", state.id(), event),
                    };
                    if let Some(guard) = transition.guard() {
                        line.push_str(&format!(" [{}]", guard.describe()));
                    }
                    if !transition.actions().is_empty() {
                        let actions: Vec<&str> =
                            transition.actions().iter().map(|action| action.describe()).collect();
                        line.push_str(&format!(" / {}", actions.join(", ")));
                    }
                    self.lines.push(line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TransitionDefinition;
    use crate::holder::{ActionHolder, GuardHolder};

    fn is_open() -> bool {
        true
    }

    fn ring() {}

    #[test]
    fn test_transition_list() {
        let mut states = StateDefinitions::<&str, &str>::new();
        let idle = states.add("Idle");
        let busy = states.add("Busy");
        states
            .add_transition(
                idle,
                TransitionDefinition::new("start", Some(busy))
                    .with_guard(GuardHolder::new(is_open))
                    .with_action(ActionHolder::new(ring)),
            )
            .unwrap();
        states
            .add_transition(busy, TransitionDefinition::new("poke", None))
            .unwrap();

        let mut report = TransitionListReport::new();
        report.report("door", &states, Some(&"Idle"));

        assert_eq!(
            report.lines(),
            [
                "\"Idle\" -\"start\"-> \"Busy\" [is_open] / ring",
                "\"Busy\" -\"poke\"-> internal"
            ]
        );
    }
}
