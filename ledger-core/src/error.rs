//! Error types for the ledger

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every variant aborts the operation that produced it before any state is
/// mutated. Nothing is retried internally.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller lacks the role the operation requires
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Operation is invalid for the record's current status
    #[error("State error: {0}")]
    State(String),

    /// Referenced job, token, escrow or reward does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested movement would exceed the remaining escrow balance
    #[error("Conservation error: {0}")]
    Conservation(String),

    /// Event log hash chain or snapshot does not verify
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable classification of the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::State(_) => ErrorKind::State,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conservation(_) => ErrorKind::Conservation,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Concurrency(_) => ErrorKind::Concurrency,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// True for the rejections a submitted operation can produce
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::Authorization
                | ErrorKind::State
                | ErrorKind::NotFound
                | ErrorKind::Conservation
        )
    }
}

/// Error classification, used for metrics labels and wire output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`Error::Validation`]
    Validation,
    /// See [`Error::Authorization`]
    Authorization,
    /// See [`Error::State`]
    State,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::Conservation`]
    Conservation,
    /// See [`Error::Integrity`]
    Integrity,
    /// See [`Error::Serialization`]
    Serialization,
    /// See [`Error::Concurrency`]
    Concurrency,
    /// See [`Error::Config`]
    Config,
    /// See [`Error::Io`]
    Io,
}

impl ErrorKind {
    /// Label used in metrics and JSON output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conservation => "conservation",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
