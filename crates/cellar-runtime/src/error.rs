//! Definitions of errors that can occur inside the runtime core.
//!
//! Recoverable failures are [RuntimeError] values returned through the ordinary `Result` path.
//! Fatal failures are [FatalError]s: they are never returned, they are logged and raised with
//! [fatal] so the single top-level handler installed by the host reports them.
use thiserror::Error;

use crate::cell::Kind;

#[derive(Error, miette::Diagnostic, Debug, Clone, PartialEq)]
#[diagnostic(url(docsrs))]
pub enum RuntimeError {
    #[error("series is frozen and cannot be modified")]
    #[diagnostic(code(cellar::protected::series))]
    FrozenSeries,

    #[error("cell is protected and cannot be written")]
    #[diagnostic(code(cellar::protected::cell))]
    ProtectedCell,

    #[error("value is a const view and cannot be used to modify its series")]
    #[diagnostic(code(cellar::protected::constant))]
    ConstValue,

    #[error("expected {expected} but got {found}")]
    #[diagnostic(code(cellar::type_mismatch))]
    TypeMismatch { expected: String, found: Kind },

    #[error("'{action}' does not allow {found} for its '{param}' argument")]
    #[diagnostic(code(cellar::arg::kind))]
    ArgType {
        action: String,
        param: String,
        found: Kind,
    },

    #[error("'{action}' is missing its '{param}' argument")]
    #[diagnostic(code(cellar::arg::missing))]
    MissingArg { action: String, param: String },

    #[error("'{action}' expects at most {expected} arguments, got {found}")]
    #[diagnostic(code(cellar::arg::arity))]
    TooManyArgs {
        action: String,
        expected: usize,
        found: usize,
    },

    #[error("'{action}' has no parameter named '{param}'")]
    #[diagnostic(code(cellar::arg::unknown))]
    NoSuchParam { action: String, param: String },

    #[error("'{action}' got its '{param}' argument twice")]
    #[diagnostic(code(cellar::arg::duplicate))]
    DuplicateArg { action: String, param: String },

    #[error("data is unavailable, its backing resource was released")]
    #[diagnostic(code(cellar::unavailable))]
    Unavailable,

    #[error("index {index} is out of range for length {len}")]
    #[diagnostic(code(cellar::out_of_range))]
    OutOfRange { index: usize, len: usize },

    #[error("cannot set capacity to {requested}, series already holds {len} elements")]
    #[diagnostic(code(cellar::capacity))]
    BadCapacity { requested: usize, len: usize },

    #[error("'{0}' is not bound to a context")]
    #[diagnostic(code(cellar::unbound))]
    Unbound(String),

    #[error("'{0}' is not a field of this context")]
    #[diagnostic(code(cellar::no_field))]
    NoSuchField(String),

    #[error("value is relative to an action and can only be read inside one of its calls")]
    #[diagnostic(code(cellar::relative))]
    RelativeValue,

    #[error("'{0}' overflowed")]
    #[diagnostic(code(cellar::overflow))]
    Overflow(String),

    #[error("value is not quoted")]
    #[diagnostic(code(cellar::not_quoted))]
    NotQuoted,

    #[error("text is not valid UTF-8")]
    #[diagnostic(code(cellar::utf8))]
    InvalidUtf8,

    #[error("{0}")]
    #[diagnostic(code(cellar::user))]
    User(String),
}

impl RuntimeError {
    pub fn expected(expected: impl Into<String>, found: Kind) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.into(),
            found,
        }
    }
}

impl From<String> for RuntimeError {
    fn from(value: String) -> Self {
        RuntimeError::User(value)
    }
}

impl From<&str> for RuntimeError {
    fn from(value: &str) -> Self {
        RuntimeError::User(value.to_string())
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

/// Conditions that mean the heap can no longer be trusted.
#[derive(Error, miette::Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("out of memory: could not obtain {bytes} bytes from the system")]
    #[diagnostic(code(cellar::fatal::alloc))]
    AllocationFailed { bytes: usize },

    #[error("internal consistency failure: {0}")]
    #[diagnostic(code(cellar::fatal::inconsistent))]
    Inconsistent(String),
}

/// Aborts the current evaluation with a fatal error. The host's panic handler is the only place
/// where these are observed.
#[cold]
#[track_caller]
pub fn fatal(error: FatalError) -> ! {
    tracing::error!(%error, "fatal runtime error");
    panic!("{error}")
}

/// Shorthand for [FatalError::Inconsistent].
#[cold]
#[track_caller]
pub fn inconsistent(message: impl Into<String>) -> ! {
    fatal(FatalError::Inconsistent(message.into()))
}
