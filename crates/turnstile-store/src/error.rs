//! Database error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::database::EntityKind;

/// Result type for database operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the database collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No entity exists under the requested key.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Entity kind looked up.
        kind: EntityKind,
        /// Lookup key, redacted for secrets.
        key: String,
    },

    /// The query did not finish within the configured bound.
    #[error("{kind} query timed out after {after:?}")]
    Timeout {
        /// Entity kind looked up.
        kind: EntityKind,
        /// Elapsed bound.
        after: Duration,
    },

    /// The backend failed.
    #[error("{kind} query failed: {message}")]
    Backend {
        /// Entity kind looked up.
        kind: EntityKind,
        /// Backend error text; never shown to clients.
        message: String,
    },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(kind: EntityKind, after: Duration) -> Self {
        Self::Timeout { kind, after }
    }

    /// Create a backend error.
    pub fn backend(kind: EntityKind, message: impl Into<String>) -> Self {
        Self::Backend {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` if the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The entity kind the failed query was for.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::NotFound { kind, .. }
            | Self::Timeout { kind, .. }
            | Self::Backend { kind, .. } => *kind,
        }
    }

    /// Label used for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "error",
        }
    }
}

/// Errors loading a fixture file into the in-memory database.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The file could not be read.
    #[error("failed to read fixtures from {path}")]
    Read {
        /// Fixture file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid fixture JSON.
    #[error("invalid fixtures in {path}: {source}")]
    Parse {
        /// Fixture file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl FixtureError {
    /// Create a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error.
    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}
