//! Deferred units of work.

use std::any::Any;
use std::error::Error;
use std::fmt;

use thiserror::Error;

use crate::simulation::{Priority, Simulator};
use crate::time::SimTime;

/// A type-erased error returned by actions and model constructors.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A type-erased action, ready for execution.
pub(crate) type BoxedAction<T> =
    Box<dyn FnOnce(&Simulator<T>) -> Result<(), BoxError> + Send + 'static>;

/// The return type of an action or model constructor.
///
/// This trait is implemented for `()` (infallible closures) and for
/// `Result<(), E>` where `E` can be converted into a [`BoxError`], which makes
/// it possible to use the `?` operator within actions.
pub trait Outcome {
    /// Converts the outcome into a `Result`.
    fn into_result(self) -> Result<(), BoxError>;
}

impl Outcome for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> Outcome for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Type-erases an action closure.
pub(crate) fn box_action<T, F, R>(action: F) -> BoxedAction<T>
where
    T: SimTime,
    F: FnOnce(&Simulator<T>) -> R + Send + 'static,
    R: Outcome,
{
    Box::new(move |simulator| action(simulator).into_result())
}

/// The cause of an action failure.
#[derive(Debug, Error)]
pub enum ActionFailure {
    /// The action returned an error.
    #[error("{0}")]
    Error(BoxError),
    /// The action panicked; the payload is the panic message, if any.
    #[error("panicked: {0}")]
    Panic(String),
}

impl ActionFailure {
    /// Converts a panic payload into an `ActionFailure`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panic(panic_message(payload))
    }
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_owned(),
            Err(_) => String::from("<non-string panic payload>"),
        },
    }
}

/// An error raised by the action of an event.
///
/// Action errors never abort a run: they are logged, counted and delivered to
/// observers as [`Notification::ActionFailed`](crate::simulation::Notification::ActionFailed),
/// after which the run loop proceeds with the next event.
#[derive(Debug, Error)]
#[error("action of the event scheduled at {time:?} (priority {priority}, sequence {sequence}) failed: {failure}")]
pub struct ActionError<T: SimTime> {
    /// Scheduled time of the event.
    pub time: T,
    /// Priority of the event.
    pub priority: Priority,
    /// Sequence number of the event.
    pub sequence: u64,
    /// The cause of the failure.
    #[source]
    pub failure: ActionFailure,
}

impl<T: SimTime> ActionError<T> {
    /// Returns the panic message if the action panicked.
    pub fn panic_message(&self) -> Option<&str> {
        match &self.failure {
            ActionFailure::Panic(msg) => Some(msg),
            ActionFailure::Error(_) => None,
        }
    }
}

/// Formats an action closure for debugging purposes.
pub(crate) struct OpaqueAction;

impl fmt::Debug for OpaqueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<action>")
    }
}
