//! Unified error type for WiseJSON.
//!
//! Every internal crate defines its own narrower error enum for the
//! failures it can produce, then converts into [`Error`] at the crate
//! boundary. Applications embedding WiseJSON only ever see [`Error`].

use std::io;
use thiserror::Error;

/// Result type alias for WiseJSON operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Ill-formed arguments: a null id, a non-object patch, an unknown
    /// projection mix, an invalid `$regex` pattern, and similar.
    #[error("validation error: {0}")]
    Validation(String),

    /// A unique index rejected an insert/update/upsert because the
    /// value already maps to a different document.
    #[error("unique constraint violated on field {field:?} for value {value}")]
    UniqueConstraint {
        /// The indexed field that was violated.
        field: String,
        /// A debug rendering of the offending value.
        value: String,
    },

    /// Checkpoint or WAL data on disk could not be parsed, or referenced
    /// a file that is missing or unparseable, and recovery was not
    /// configured to skip past it.
    #[error("corrupted storage: {0}")]
    CorruptedStorage(String),

    /// An operation was attempted on a collection or database that is
    /// `closing` or `closed`.
    #[error("{0} is closed")]
    ClosedState(String),

    /// The collection directory is already locked by another process
    /// (or another open handle within this one).
    #[error("failed to acquire lock on {path}: {reason}")]
    Lock {
        /// Path of the lock file.
        path: String,
        /// Why acquisition failed.
        reason: String,
    },

    /// A caller explicitly asked for something by identity ("get
    /// document", "drop collection") and its absence is itself the
    /// signal. Internal lookups return `None`/`false` instead of this
    /// variant.
    #[error("not found: {0}")]
    NotFound(String),

    /// A collection's recovery sequence failed once and the failure is
    /// now cached permanently; every later call for that collection
    /// replays this cause instead of retrying recovery from scratch.
    #[error("collection initialization failed: {0}")]
    InitFailed(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for failures a caller could plausibly retry (I/O hiccups,
    /// lock contention) as opposed to ones that will never succeed
    /// without changing the request (validation, unique violations).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Lock { .. })
    }

    /// Shorthand constructor for [`Error::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Shorthand constructor for [`Error::UniqueConstraint`].
    pub fn unique_constraint(field: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Error::UniqueConstraint {
            field: field.into(),
            value: value.to_string(),
        }
    }

    /// Shorthand constructor for [`Error::CorruptedStorage`].
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Error::CorruptedStorage(msg.into())
    }

    /// Shorthand constructor for [`Error::ClosedState`].
    pub fn closed(what: impl Into<String>) -> Self {
        Error::ClosedState(what.into())
    }

    /// Shorthand constructor for [`Error::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Shorthand constructor for [`Error::Lock`].
    pub fn lock(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Lock {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand constructor for [`Error::InitFailed`].
    pub fn init_failed(cause: impl Into<String>) -> Self {
        Error::InitFailed(cause.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_retryable() {
        let e = Error::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(e.is_retryable());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let e = Error::validation("bad patch");
        assert!(!e.is_retryable());
    }

    #[test]
    fn unique_constraint_message_includes_field_and_value() {
        let e = Error::unique_constraint("email", "\"a@b.com\"");
        let msg = e.to_string();
        assert!(msg.contains("email"));
        assert!(msg.contains("a@b.com"));
    }
}
