//! Firing a single transition across the state hierarchy.

use crate::context::TransitionContext;
use crate::definition::{EventId, StateDefinitions, StateId, StateIndex, TransitionDefinition};
use crate::error::{Error, SharedError};
use crate::extension::ExtensionHost;
use crate::state_logic::{LastActiveStates, StateLogic};

/// Outcome of firing a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionResult {
    /// The transition executed; the machine is now in `new_state`.
    Fired {
        /// Innermost state settled into
        new_state: StateIndex,
    },
    /// The guard rejected the event.
    NotFired,
}

impl TransitionResult {
    /// True when the transition executed.
    pub fn is_fired(&self) -> bool {
        matches!(self, Self::Fired { .. })
    }

    /// State after the transition, if it fired.
    pub fn new_state(&self) -> Option<StateIndex> {
        match self {
            Self::Fired { new_state } => Some(*new_state),
            Self::NotFired => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Exit(StateIndex),
    Actions,
    Entry(StateIndex),
}

/// Executes guards, actions and the exit/entry sequence of transitions.
pub(crate) struct TransitionLogic<'a, S: StateId, E: EventId> {
    states: &'a StateDefinitions<S, E>,
    extensions: &'a ExtensionHost<S, E>,
    state_logic: StateLogic<'a, S, E>,
}

impl<'a, S: StateId, E: EventId> TransitionLogic<'a, S, E> {
    pub fn new(states: &'a StateDefinitions<S, E>, extensions: &'a ExtensionHost<S, E>) -> Self {
        Self {
            states,
            extensions,
            state_logic: StateLogic::new(states, extensions),
        }
    }

    /// Fire `transition` for the event described by `context`.
    ///
    /// A rejected or failing guard yields [`TransitionResult::NotFired`]. Failing
    /// actions are surfaced through the context and do not interrupt the
    /// transition.
    pub async fn fire(
        &self,
        transition: &TransitionDefinition<E>,
        context: &mut TransitionContext<'_, S, E>,
        last_active: &mut LastActiveStates,
    ) -> Result<TransitionResult, Error<S>> {
        let source = transition.source().ok_or_else(|| Error::TransitionNotAttached {
            event: format!("{:?}", transition.event()),
        })?;

        if !self.should_fire(transition, context).await? {
            self.extensions
                .for_each(|extension| extension.skipped_transition(transition, context));
            return Ok(TransitionResult::NotFired);
        }

        context.on_transition_begin();
        self.extensions
            .for_each(|extension| extension.executing_transition(transition, context));

        let new_state = match transition.target() {
            None => {
                self.perform_actions(transition, context).await?;
                context.state()
            }
            Some(target) => {
                self.unwind_sub_states(source, context, last_active).await?;
                for step in self.traversal(source, target) {
                    match step {
                        Step::Exit(state) => {
                            self.state_logic.exit(state, context, last_active).await?
                        }
                        Step::Actions => self.perform_actions(transition, context).await?,
                        Step::Entry(state) => self.state_logic.entry(state, context).await?,
                    }
                }
                self.state_logic
                    .enter_by_history(target, context, last_active)
                    .await?
            }
        };

        self.extensions
            .for_each(|extension| extension.executed_transition(transition, context));
        Ok(TransitionResult::Fired { new_state })
    }

    /// Exit the active states below `source`, innermost first.
    ///
    /// The event may be handled by a super-state of the active state.
    async fn unwind_sub_states(
        &self,
        source: StateIndex,
        context: &mut TransitionContext<'_, S, E>,
        last_active: &mut LastActiveStates,
    ) -> Result<(), Error<S>> {
        for state in self.states.ancestors(context.state()) {
            if state == source {
                break;
            }
            self.state_logic.exit(state, context, last_active).await?;
        }
        Ok(())
    }

    /// Exit/action/entry sequence from `source` to `target`.
    ///
    /// Walks both ends up the hierarchy until they meet below their nearest
    /// common ancestor, which is neither exited nor entered. Exits are collected
    /// while walking up from the source, entries while walking up from the target
    /// and replayed outermost first.
    fn traversal(&self, source: StateIndex, target: StateIndex) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut entries = Vec::new();
        let (mut from, mut to) = (source, target);

        loop {
            let from_state = self.states.get(from);
            let to_state = self.states.get(to);

            if from == target {
                // self transition, or the source was walked up to the target
                steps.extend([Step::Exit(from), Step::Actions, Step::Entry(target)]);
                break;
            }
            if from == to {
                // the target was walked up to the source
                steps.push(Step::Actions);
                break;
            }
            if from_state.super_state() == to_state.super_state() {
                steps.extend([Step::Exit(from), Step::Actions, Step::Entry(to)]);
                break;
            }

            if from_state.level() > to_state.level() {
                steps.push(Step::Exit(from));
                let Some(parent) = from_state.super_state() else { break };
                from = parent;
            } else if from_state.level() < to_state.level() {
                entries.push(to);
                let Some(parent) = to_state.super_state() else { break };
                to = parent;
            } else {
                steps.push(Step::Exit(from));
                entries.push(to);
                let (Some(from_parent), Some(to_parent)) =
                    (from_state.super_state(), to_state.super_state())
                else {
                    break;
                };
                from = from_parent;
                to = to_parent;
            }
        }

        steps.extend(entries.into_iter().rev().map(Step::Entry));
        steps
    }

    async fn should_fire(
        &self,
        transition: &TransitionDefinition<E>,
        context: &mut TransitionContext<'_, S, E>,
    ) -> Result<bool, Error<S>> {
        let Some(guard) = transition.guard() else {
            return Ok(true);
        };

        let outcome = guard.execute(context.argument()).await;
        match outcome {
            Ok(passed) => Ok(passed),
            Err(error) => {
                self.handle_guard_exception(transition, context, error)?;
                Ok(false)
            }
        }
    }

    async fn perform_actions(
        &self,
        transition: &TransitionDefinition<E>,
        context: &mut TransitionContext<'_, S, E>,
    ) -> Result<(), Error<S>> {
        for action in transition.actions() {
            let outcome = action.execute(context.argument()).await;
            if let Err(mut error) = outcome {
                self.extensions.for_each(|extension| {
                    extension.handling_transition_exception(transition, context, &mut error)
                });
                context.on_exception_thrown(error.clone())?;
                self.extensions.for_each(|extension| {
                    extension.handled_transition_exception(transition, context, &error)
                });
            }
        }
        Ok(())
    }

    fn handle_guard_exception(
        &self,
        transition: &TransitionDefinition<E>,
        context: &mut TransitionContext<'_, S, E>,
        mut error: SharedError,
    ) -> Result<(), Error<S>> {
        self.extensions.for_each(|extension| {
            extension.handling_guard_exception(transition, context, &mut error)
        });
        context.on_exception_thrown(error.clone())?;
        self.extensions.for_each(|extension| {
            extension.handled_guard_exception(transition, context, &error)
        });
        Ok(())
    }
}
