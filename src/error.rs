//! Error taxonomy shared across the crate.
//!
//! Every fallible operation returns [`Result`]. Errors carry a [`ErrorKind`]
//! so callers can react to the category (retry, report, abort) without
//! parsing messages.

use std::fmt;

use thiserror::Error;

/// Category of a failure.
///
/// - [`ErrorKind::Internal`] signals a broken invariant and is always a bug.
/// - [`ErrorKind::Cancelled`] signals a deadline hit; partial results may
///   still be usable.
/// - All the other kinds are recoverable at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration, dataspec, or flag value.
    InvalidArgument,
    /// Unknown learner/model/format key, or a missing file.
    NotFound,
    /// Model or dataset state is invalid (shape mismatch, missing ranking
    /// group, incomplete model directory).
    FailedPrecondition,
    /// A configured limit was exceeded (ranking group too large, presort
    /// memory).
    ResourceExhausted,
    /// Invariant violated at runtime.
    Internal,
    /// Training deadline reached.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Error type used throughout the crate.
#[derive(Error, Debug, Clone)]
#[error("[{kind}] {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        };
        Self::new(kind, format!("io error: {err}"))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::invalid_argument(format!("csv error: {err}"))
    }
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Self::failed_precondition(format!("serialization error: {err}"))
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Self::invalid_argument(format!("invalid regex: {err}"))
    }
}
