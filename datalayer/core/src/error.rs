//! Error types for the data layer
//!
//! Every backend failure surfaces as a single [`QueryExecutionError`] that
//! carries the backend it came from and a coarse [`FailureKind`]. The
//! orchestrator only needs to know *whether* the primary failed in order to
//! fail over; the kind exists for logging and for callers that want to
//! distinguish a timeout from a bad query.

use thiserror::Error;

use crate::result::DataSource;
use crate::workspace::WorkspaceError;

/// Coarse classification of a backend failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Pool exhausted, backend unreachable, or executor closed
    ConnectionUnavailable,

    /// Statement exceeded its server-side or client-side time limit
    StatementTimeout,

    /// Backend rejected or failed the query
    Execution,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionUnavailable => write!(f, "connection unavailable"),
            Self::StatementTimeout => write!(f, "statement timeout"),
            Self::Execution => write!(f, "execution error"),
        }
    }
}

/// A query failed on one of the backends
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{backend} backend {kind}: {message}")]
pub struct QueryExecutionError {
    /// Backend that produced the failure
    pub backend: DataSource,

    /// Failure classification
    pub kind: FailureKind,

    /// Human-readable cause, usually the backend's own message
    pub message: String,
}

impl QueryExecutionError {
    pub fn new(backend: DataSource, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
        }
    }

    pub fn connection(backend: DataSource, message: impl Into<String>) -> Self {
        Self::new(backend, FailureKind::ConnectionUnavailable, message)
    }

    pub fn timeout(backend: DataSource, message: impl Into<String>) -> Self {
        Self::new(backend, FailureKind::StatementTimeout, message)
    }

    pub fn execution(backend: DataSource, message: impl Into<String>) -> Self {
        Self::new(backend, FailureKind::Execution, message)
    }

    /// Classify a workspace API failure
    pub(crate) fn from_workspace(backend: DataSource, err: &WorkspaceError) -> Self {
        let kind = match err {
            e if e.is_timeout() => FailureKind::StatementTimeout,
            e if e.is_connect() => FailureKind::ConnectionUnavailable,
            WorkspaceError::InvalidHost(_) | WorkspaceError::MissingEndpoint(_) => {
                FailureKind::ConnectionUnavailable
            }
            WorkspaceError::Api { .. } | WorkspaceError::Http(_) => FailureKind::Execution,
        };
        Self::new(backend, kind, err.to_string())
    }

    /// The cause string without the backend/kind prefix
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures while assembling a data layer from configuration
#[derive(Debug, Error)]
pub enum DataLayerError {
    /// Configuration rejected by validation
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Workspace API client could not be built
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
}
