//! Error types for every stage of dispatching a JSON RPC request.
//!
//! The stages a request goes through (validate, resolve, bind, invoke, encode) each have their own
//! failure mode, and each of those maps to exactly one JSON RPC error code.  [`DispatchError`] is
//! the top-level type that the registry turns into an error response; the other types here are
//! the more specific failures that it wraps.
use std::fmt;
use std::panic::Location;
use std::path::Path;

use thiserror::Error;

use crate::convert::ConvertError;
use crate::types::ErrorCode;

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

/// Everything that can go wrong handling a single request envelope.
///
/// None of these are fatal to anything beyond the envelope they occurred in.  In a batch, the
/// next line is processed as if nothing happened.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request text was not JSON at all
    #[error("Parse error: {0}")]
    Parse(String),

    /// The request was JSON, but not a valid JSON RPC 2.0 request object
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    /// The request body (or NDJSON line) is larger than the configured limit.  `size` is known
    /// only when the reader measured the whole thing.
    #[error("Request exceeds the limit of {limit} bytes")]
    Oversized { size: Option<usize>, limit: usize },

    #[error("Method not found: '{method}'")]
    MethodNotFound { method: String },

    #[error("Invalid params for '{method}': {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: ArgumentError,
    },

    #[error("Error executing '{method}': {source}")]
    Execution {
        method: String,
        #[source]
        source: ExecutionError,
    },
}

impl DispatchError {
    /// The JSON RPC error code that corresponds to this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Parse(_) => ErrorCode::ParseError,
            DispatchError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            DispatchError::Oversized { .. } => ErrorCode::OversizedRequest,
            DispatchError::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            DispatchError::InvalidParams { .. } => ErrorCode::InvalidParams,
            DispatchError::Execution { .. } => ErrorCode::ServerError(SERVER_ERROR_CODE),
        }
    }

    /// True if the failure happened inside the service method rather than because of something
    /// the caller sent.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, DispatchError::Execution { .. })
    }
}

/// The code used for every failure raised by a service method.
pub const SERVER_ERROR_CODE: i32 = -32000;

/// The wire arguments could not be bound to the parameters of the method.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("missing required parameter '{param}'")]
    Missing { param: String },

    #[error("unexpected parameter '{param}'")]
    Unexpected { param: String },

    #[error("parameter '{param}': {source}")]
    Decode {
        param: String,
        #[source]
        source: ConvertError,
    },

    /// `params` was present but neither an array nor an object
    #[error("params must be an array or an object, got {found}")]
    Shape { found: &'static str },
}

/// The method was called, and it (or the encoding of what it returned) failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(MethodError),

    #[error("method panicked: {0}")]
    Panicked(String),

    #[error("could not encode the return value: {0}")]
    Encode(#[source] ConvertError),

    /// The entry this method belongs to was dropped while the method was still reachable.
    #[error("service '{0}' is no longer registered")]
    ServiceGone(String),

    #[error("service instance is not a {expected}")]
    IncompatibleInstance { expected: &'static str },
}

/// Failure reported by a service method.
///
/// Records where it was created, so the message that goes back to the caller points at the line
/// that failed.  Conversions through `?` are `#[track_caller]`, which means the location is the
/// `?` itself and not somewhere in this crate.
///
/// This deliberately does not implement [`std::error::Error`], so that anything that does can be
/// converted into it with `?`.
pub struct MethodError {
    message: String,
    location: Option<&'static Location<'static>>,
}

impl MethodError {
    #[track_caller]
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            location: Some(Location::caller()),
        }
    }

    /// An error with no source location, for failures that don't originate in Rust code the
    /// caller would recognize.
    pub fn without_location(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            location: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }
}

impl<E> From<E> for MethodError
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[track_caller]
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => {
                // Only the file name; the full path is an implementation detail of whoever built
                // the service
                let file = Path::new(location.file())
                    .file_name()
                    .map(|name| name.to_string_lossy())
                    .unwrap_or_else(|| location.file().into());
                write!(f, "[{}:{}] {}", file, location.line(), self.message)
            }
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Debug for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodError")
            .field("message", &self.message)
            .field("location", &self.location.map(|l| format!("{}:{}", l.file(), l.line())))
            .finish()
    }
}

/// Problems with a service or method declaration, reported when it's registered.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid name '{0}': names must be non-empty and must not contain '.'")]
    InvalidName(String),

    #[error("a service named '{0}' is already registered")]
    DuplicateService(String),

    #[error("method '{method}' is declared more than once on service '{service}'")]
    DuplicateMethod { service: String, method: String },

    #[error("method '{method}' takes {expected} parameters but {actual} names were given")]
    ParamNames {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("method '{method}' refers to adapter '{tag}', which is not registered")]
    UnknownAdapter { method: String, tag: String },

    #[error("service '{name}' is registered with a different type than {expected}")]
    IncompatibleInstance { name: String, expected: &'static str },
}

/// Best-effort extraction of the message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
