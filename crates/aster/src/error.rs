use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{object::Object, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Result type threaded through the evaluator.
///
/// `Flow` carries both runtime errors and the non-local `return` signal, so a
/// single `?` propagates either until something is prepared to handle it.
pub(crate) type EvalResult = Result<Value, Flow>;

/// Error kinds surfaced to embedders.
///
/// This is a tag, not an exception hierarchy: nothing inside the core catches
/// by kind, the first frame that reaches the embedder raises the structured
/// error as-is. Uses strum derives so the tag round-trips as its name
/// (e.g. `ErrorKind::TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Malformed module: missing entry, duplicate field names, unknown
    /// `Data` type in a `Construct`, undeserializable input.
    LoadError,
    /// Dynamic type mismatch, e.g. a non-boolean `if` condition or member
    /// access on a non-record.
    TypeError,
    /// Call with the wrong argument count.
    ArityError,
    /// Read of or assignment to an undeclared name.
    UnboundName,
    /// No pattern matched the scrutinee.
    MatchError,
    /// Operation requires an effect not in the current permission set.
    EffectViolation,
    /// Record construction with wrong, duplicate, or missing fields.
    ArgumentError,
    /// Await or result read of a cancelled task.
    CancelledError,
    /// Workflow exceeded its declared timeout.
    TimeoutError,
    /// Permanent task failure surfaced at the workflow's return point.
    WorkflowFailure,
    /// DAG registration would create a cycle.
    CycleError,
    /// A step dependency never resolved to a registered task.
    UnknownTask,
    /// Host resource limit exceeded (recursion depth).
    ResourceError,
}

/// A structured runtime error: an [`ErrorKind`] tag, a human-readable
/// message, an optional value payload, and any suppressed secondary errors
/// (compensation failures collected beneath a workflow failure).
#[derive(Debug, Clone)]
pub struct RunError {
    kind: ErrorKind,
    message: String,
    payload: Option<Value>,
    cause: Option<Box<RunError>>,
    suppressed: Vec<RunError>,
}

impl RunError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
            cause: None,
            suppressed: Vec::new(),
        }
    }

    pub(crate) fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoadError, message)
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub(crate) fn arity(name: &str, expected: usize, got: usize) -> Self {
        Self::new(
            ErrorKind::ArityError,
            format!("{name}() takes {expected} argument(s) but {got} were given"),
        )
    }

    pub(crate) fn unbound(name: &str) -> Self {
        Self::new(ErrorKind::UnboundName, format!("name '{name}' is not bound"))
    }

    pub(crate) fn match_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MatchError, message)
    }

    /// Builds the violation raised when `effect` is missing from the current
    /// permission set. The effect name is embedded in the message so
    /// embedders can report which grant was required.
    pub(crate) fn effect_violation(effect: &str) -> Self {
        Self::new(
            ErrorKind::EffectViolation,
            format!("operation requires effect '{effect}' which is not permitted"),
        )
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgumentError, message)
    }

    pub(crate) fn cancelled(task: &str) -> Self {
        Self::new(ErrorKind::CancelledError, format!("task '{task}' was cancelled"))
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }

    pub(crate) fn cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CycleError, message)
    }

    pub(crate) fn unknown_task(name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownTask,
            format!("task '{name}' is not registered in the workflow"),
        )
    }

    pub(crate) fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceError, message)
    }

    /// Builds the error surfaced at a workflow node's return point from a
    /// permanent task failure. The original runtime error is preserved as
    /// the cause; the wrapper repeats its message so embedders matching on
    /// text see the original payload.
    pub(crate) fn workflow_failure(cause: RunError) -> Self {
        let mut err = Self::new(ErrorKind::WorkflowFailure, cause.message.clone());
        err.cause = Some(Box::new(cause));
        err
    }

    /// Wraps a non-error failure payload published by a task body.
    ///
    /// Failures that already are runtime errors go through
    /// [`RunError::workflow_failure`]; this constructor only exists for the
    /// remaining case.
    pub(crate) fn workflow_failure_value(payload: Value) -> Self {
        let mut err = Self::new(
            ErrorKind::WorkflowFailure,
            format!("Workflow execution failed: {payload}"),
        );
        err.payload = Some(payload);
        err
    }

    /// Attaches suppressed secondary errors (compensation failures) beneath
    /// this error.
    #[must_use]
    pub(crate) fn with_suppressed(mut self, suppressed: Vec<RunError>) -> Self {
        self.suppressed.extend(suppressed);
        self
    }

    /// The error-kind tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The original error a `WorkflowFailure` wraps, when it was a runtime
    /// error.
    #[must_use]
    pub fn cause(&self) -> Option<&RunError> {
        self.cause.as_deref()
    }

    /// Secondary errors suppressed beneath this one, in the order they were
    /// collected.
    #[must_use]
    pub fn suppressed(&self) -> &[RunError] {
        &self.suppressed
    }

    /// The non-error failure payload a `WorkflowFailure` wraps, converted
    /// for the host. `None` for errors without a value payload.
    #[must_use]
    pub fn payload(&self) -> Option<Object> {
        self.payload.as_ref().and_then(|value| Object::from_value(value).ok())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for suppressed in &self.suppressed {
            write!(f, "\n  suppressed: {suppressed}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunError {}

/// Non-local control signal threaded through the evaluator.
///
/// `Return` unwinds only to the enclosing call's frame boundary, where it is
/// converted back into a plain value. `Raise` propagates outward untouched;
/// the core never catches it.
#[derive(Debug)]
pub(crate) enum Flow {
    Return(Value),
    Raise(RunError),
}

impl From<RunError> for Flow {
    fn from(err: RunError) -> Self {
        Self::Raise(err)
    }
}

impl Flow {
    /// Delivers the signal at a call-target boundary: a `Return` becomes the
    /// call's value, an error keeps propagating.
    pub fn into_call_result(self) -> RunResult<Value> {
        match self {
            Self::Return(value) => Ok(value),
            Self::Raise(err) => Err(err),
        }
    }
}
