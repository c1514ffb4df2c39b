//! Error types for configuration loading and backend lookups.
//!
//! Neither type ever reaches a client: the engine turns backend failures
//! into Deferred verdicts, and configuration failures are either fatal at
//! startup or logged while the previous snapshot keeps serving.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading the delivery configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A backing file exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A backing file contains a line that cannot be parsed.
    #[error("{}:{line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A query named a hosting context that is not configured.
    #[error("Unknown context: {0}")]
    UnknownTenant(String),

    /// A resolver setting is out of range.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    /// The blocking reload task panicked or was cancelled.
    #[error("Reload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ConfigError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// Errors raised by a Local-User Source or dot-file storage.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The lookup did not finish within the backend deadline.
    #[error("Backend lookup timed out")]
    Timeout,

    /// Filesystem access failed for a reason other than "not found".
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backend is reachable but refused to answer.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Returns `true` if a later retry may succeed.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

impl From<tokio::time::error::Elapsed> for BackendError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
