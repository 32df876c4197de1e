//! PlantUML diagram generation

use std::fmt::Write;

use crate::definition::{EventId, HistoryType, StateDefinition, StateDefinitions, StateId};
use crate::report::StateMachineReport;

/// Renders a machine definition as a PlantUML state diagram.
///
/// Composite states are nested, initial sub-states are marked with `[*]`,
/// history with `[H]` / `[H*]`. Guards and actions are written with their
/// holder descriptions.
#[derive(Debug, Default)]
pub struct PlantUmlReport {
    diagram: String,
}

impl PlantUmlReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagram produced by the last call to [`report`](StateMachineReport::report).
    pub fn diagram(&self) -> &str {
        &self.diagram
    }

    /// Take the diagram out of the report.
    pub fn into_diagram(self) -> String {
        self.diagram
    }
}

fn alias<S: StateId>(state: &S) -> String {
    format!("{:?}", state)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn write_state<S: StateId, E: EventId>(
    out: &mut String,
    states: &StateDefinitions<S, E>,
    state: &StateDefinition<S, E>,
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    let id = alias(state.id());

    if state.has_sub_states() {
        let _ = writeln!(out, "{}state {} {{", indent, id);
        if let Some(initial) = state.initial_sub_state() {
            let _ = writeln!(out, "{}  [*] --> {}", indent, alias(states.id(initial)));
        }
        match state.history_type() {
            HistoryType::None => {}
            HistoryType::Shallow => {
                let _ = writeln!(out, "{}  state \"[H]\" as {}_history", indent, id);
            }
            HistoryType::Deep => {
                let _ = writeln!(out, "{}  state \"[H*]\" as {}_history", indent, id);
            }
        }
        for sub_state in state.sub_states() {
            write_state(out, states, states.get(*sub_state), depth + 1);
        }
        let _ = writeln!(out, "{}}}", indent);
    } else {
        let _ = writeln!(out, "{}state {}", indent, id);
    }

    for action in state.entry_actions() {
        let _ = writeln!(out, "{}{} : entry / {}", indent, id, action.describe());
    }
    for action in state.exit_actions() {
        let _ = writeln!(out, "{}{} : exit / {}", indent, id, action.describe());
    }
}

fn write_transitions<S: StateId, E: EventId>(
    out: &mut String,
    states: &StateDefinitions<S, E>,
    state: &StateDefinition<S, E>,
) {
    let id = alias(state.id());
    for (event, candidates) in state.transitions() {
        for transition in candidates {
            let mut label = format!("{:?}", event);
            if let Some(guard) = transition.guard() {
                let _ = write!(label, " [{}]", guard.describe());
            }
            if !transition.actions().is_empty() {
                let actions: Vec<&str> = transition
                    .actions()
                    .iter()
                    .map(|action| action.describe())
                    .collect();
                let _ = write!(label, " / {}", actions.join(", "));
            }

            match transition.target() {
                Some(target) => {
                    let _ = writeln!(out, "{} --> {} : {}", id, alias(states.id(target)), label);
                }
                None => {
                    let _ = writeln!(out, "{} : {}", id, label);
                }
            }
        }
    }
}

impl<S: StateId, E: EventId> StateMachineReport<S, E> for PlantUmlReport {
    fn report(&mut self, name: &str, states: &StateDefinitions<S, E>, initial_state: Option<&S>) {
        let mut out = String::from("@startuml\n");
        let _ = writeln!(out, "title {}\n", name);

        for root in states.roots() {
            write_state(&mut out, states, root, 0);
        }
        out.push('\n');

        if let Some(initial) = initial_state {
            let _ = writeln!(out, "[*] --> {}", alias(initial));
        }
        for state in states.iter() {
            write_transitions(&mut out, states, state);
        }

        out.push_str("@enduml\n");
        self.diagram = out;
    }
}
