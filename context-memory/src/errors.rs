//! Error types for the context memory library
//!
//! Backends translate their low-level failures (I/O, JSON, SQLite, task
//! joins) into [`ContextError`] before returning, so callers only ever see
//! the variants below.

use std::fmt::Display;

use thiserror::Error;

/// Main error type for context memory operations
#[derive(Error, Debug)]
pub enum ContextError {
    /// The project directory cannot be resolved to an absolute path
    #[error("Invalid project path '{path}': {reason}")]
    InvalidPath {
        /// Path as given by the caller
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// The AI name is empty, reserved, or not filesystem-safe
    #[error("Invalid AI name: {0}")]
    InvalidAiName(String),

    /// The storage backend failed; the turn was not remembered
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Stored data could not be parsed
    #[error("Corrupt context record at {location}: {reason}")]
    CorruptRecord {
        /// File path or table row the record came from
        location: String,
        /// Parse failure description
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ContextError {
    /// Wrap a backend failure that happened during `operation`.
    pub fn storage(operation: &str, err: impl Display) -> Self {
        Self::StorageUnavailable(format!("{operation}: {err}"))
    }

    /// Build a corrupt-record error for `location`.
    pub fn corrupt(location: impl Display, reason: impl Display) -> Self {
        Self::CorruptRecord {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error is a recoverable backend failure.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Whether the error reports an unparsable stored record.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }
}

impl From<tokio::task::JoinError> for ContextError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::storage("blocking task", err)
    }
}

/// Result type for context memory operations
pub type Result<T> = std::result::Result<T, ContextError>;
