//! Guard and action holders.
//!
//! A holder wraps one user callable together with a human readable description.
//! Callables come in four shapes: without argument or with a typed argument, each
//! either synchronous or returning a future. The typed shapes downcast the
//! [`EventArgument`] of the fired event and fail with an [`ArgumentError`] when
//! the runtime type does not match.

use std::any::{type_name, Any};
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ArgumentError, BoxError, SharedError};

/// Description of holders wrapping a closure.
pub const ANONYMOUS: &str = "anonymous";

const MISSING: &str = "missing";

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Argument passed along with a fired event.
///
/// Either *missing* (no argument was given) or an arbitrary `Send + Sync` value.
#[derive(Clone)]
pub struct EventArgument {
    value: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl EventArgument {
    /// The argument used when an event is fired without one.
    pub fn missing() -> Self {
        Self {
            value: None,
            type_name: MISSING,
        }
    }

    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Arc::new(value)),
            type_name: type_name::<T>(),
        }
    }

    /// True when no argument was given.
    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }

    /// Borrow the value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_deref()?.downcast_ref::<T>()
    }

    /// Type name of the wrapped value, or `"missing"`.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl Default for EventArgument {
    fn default() -> Self {
        Self::missing()
    }
}

impl Debug for EventArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventArgument").field(&self.type_name).finish()
    }
}

/// Return values accepted from actions.
pub trait ActionOutcome {
    /// Normalize into the engine's failure type.
    fn into_outcome(self) -> Result<(), SharedError>;
}

impl ActionOutcome for () {
    fn into_outcome(self) -> Result<(), SharedError> {
        Ok(())
    }
}

impl<E> ActionOutcome for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Result<(), SharedError> {
        self.map_err(|error| SharedError::from(error.into()))
    }
}

/// Return values accepted from guards.
pub trait GuardOutcome {
    /// Normalize into the engine's failure type.
    fn into_outcome(self) -> Result<bool, SharedError>;
}

impl GuardOutcome for bool {
    fn into_outcome(self) -> Result<bool, SharedError> {
        Ok(self)
    }
}

impl<E> GuardOutcome for Result<bool, E>
where
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Result<bool, SharedError> {
        self.map_err(|error| SharedError::from(error.into()))
    }
}

enum Invoker<R> {
    NoArgument(Box<dyn Fn() -> R + Send + Sync>),
    Argument {
        expected: &'static str,
        // None when the argument cannot be downcast
        call: Box<dyn Fn(&EventArgument) -> Option<R> + Send + Sync>,
    },
}

impl<R> Invoker<R> {
    fn typed<T, F>(call: F) -> Self
    where
        T: Any + Default,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        Self::Argument {
            expected: type_name::<T>(),
            call: Box::new(move |argument| {
                if argument.is_missing() {
                    return Some(call(&T::default()));
                }
                argument.downcast_ref::<T>().map(&call)
            }),
        }
    }

    fn invoke(&self, argument: &EventArgument, description: &str) -> Result<R, ArgumentError> {
        match self {
            Self::NoArgument(call) => Ok(call()),
            Self::Argument { expected, call } => call(argument).ok_or_else(|| ArgumentError {
                expected: *expected,
                actual: argument.type_name(),
                holder: description.to_owned(),
            }),
        }
    }
}

enum Callable<R> {
    Sync(Invoker<R>),
    Async(Invoker<BoxFuture<R>>),
}

impl<R> Callable<R> {
    async fn call(&self, argument: &EventArgument, description: &str) -> Result<R, ArgumentError> {
        match self {
            Self::Sync(invoker) => invoker.invoke(argument, description),
            Self::Async(invoker) => Ok(invoker.invoke(argument, description)?.await),
        }
    }
}

fn describe<F>() -> String {
    let name = type_name::<F>();
    if name.contains("{{closure}}") {
        return ANONYMOUS.to_owned();
    }
    name.rsplit("::").next().unwrap_or(name).to_owned()
}

fn argument_failure(error: ArgumentError) -> SharedError {
    Arc::new(error)
}

/// Action executed on entry, on exit or while a transition fires.
pub struct ActionHolder {
    callable: Callable<Result<(), SharedError>>,
    description: String,
}

impl ActionHolder {
    /// Action without argument.
    pub fn new<F, O>(action: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: ActionOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Sync(Invoker::NoArgument(Box::new(move || {
                action().into_outcome()
            }))),
        }
    }

    /// Action receiving the event argument as a `T`.
    pub fn with_argument<T, F, O>(action: F) -> Self
    where
        T: Any + Default,
        F: Fn(&T) -> O + Send + Sync + 'static,
        O: ActionOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Sync(Invoker::typed(move |value: &T| {
                action(value).into_outcome()
            })),
        }
    }

    /// Action always receiving `parameter`, whatever argument the event carries.
    pub fn parametrized<T, F, O>(action: F, parameter: T) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> O + Send + Sync + 'static,
        O: ActionOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Sync(Invoker::NoArgument(Box::new(move || {
                action(&parameter).into_outcome()
            }))),
        }
    }

    /// Asynchronous action without argument.
    pub fn new_async<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: ActionOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Async(Invoker::NoArgument(Box::new(move || {
                let pending = action();
                Box::pin(async move { pending.await.into_outcome() })
            }))),
        }
    }

    /// Asynchronous action receiving the event argument as a `T`.
    pub fn with_argument_async<T, F, Fut>(action: F) -> Self
    where
        T: Any + Default + Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: ActionOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Async(Invoker::typed(move |value: &T| {
                let pending = action(value.clone());
                Box::pin(async move { pending.await.into_outcome() }) as BoxFuture<_>
            })),
        }
    }

    /// Replace the derived description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Name of the wrapped callable, or [`ANONYMOUS`].
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Run the action with the argument of the fired event.
    pub async fn execute(&self, argument: &EventArgument) -> Result<(), SharedError> {
        match self.callable.call(argument, &self.description).await {
            Ok(outcome) => outcome,
            Err(error) => Err(argument_failure(error)),
        }
    }
}

impl Debug for ActionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionHolder").field(&self.description).finish()
    }
}

/// Predicate deciding whether a transition may fire.
pub struct GuardHolder {
    callable: Callable<Result<bool, SharedError>>,
    description: String,
}

impl GuardHolder {
    /// Guard without argument.
    pub fn new<F, O>(guard: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: GuardOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Sync(Invoker::NoArgument(Box::new(move || {
                guard().into_outcome()
            }))),
        }
    }

    /// Guard receiving the event argument as a `T`.
    pub fn with_argument<T, F, O>(guard: F) -> Self
    where
        T: Any + Default,
        F: Fn(&T) -> O + Send + Sync + 'static,
        O: GuardOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Sync(Invoker::typed(move |value: &T| guard(value).into_outcome())),
        }
    }

    /// Asynchronous guard without argument.
    pub fn new_async<F, Fut>(guard: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: GuardOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Async(Invoker::NoArgument(Box::new(move || {
                let pending = guard();
                Box::pin(async move { pending.await.into_outcome() })
            }))),
        }
    }

    /// Asynchronous guard receiving the event argument as a `T`.
    pub fn with_argument_async<T, F, Fut>(guard: F) -> Self
    where
        T: Any + Default + Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: GuardOutcome,
    {
        Self {
            description: describe::<F>(),
            callable: Callable::Async(Invoker::typed(move |value: &T| {
                let pending = guard(value.clone());
                Box::pin(async move { pending.await.into_outcome() }) as BoxFuture<_>
            })),
        }
    }

    /// Replace the derived description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Name of the wrapped callable, or [`ANONYMOUS`].
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Evaluate the guard with the argument of the fired event.
    pub async fn execute(&self, argument: &EventArgument) -> Result<bool, SharedError> {
        match self.callable.call(argument, &self.description).await {
            Ok(outcome) => outcome,
            Err(error) => Err(argument_failure(error)),
        }
    }
}

impl Debug for GuardHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GuardHolder").field(&self.description).finish()
    }
}
