//! Error types for the rotation engine.
//!
//! Configuration problems are reported synchronously to the caller at
//! registration time. Steady-state failures (descriptor races, archive
//! pruning, notification delivery) are logged by the engine and only surface
//! here when an operation is invoked directly.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Result type for loglife operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by targets, the registry and the one-shot rotate utility.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad option value (unit string, path type, schedule, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A maintenance or cleanup pass is already running for this target.
    #[error("maintenance already in progress for '{target}' (started at {since})")]
    MaintenanceInProgress {
        target: String,
        since: DateTime<Utc>,
    },

    /// The target failed to open and is disabled until re-registered.
    #[error("target '{target}' is disabled: {reason}")]
    TargetDisabled { target: String, reason: String },

    /// The target has been closed.
    #[error("target '{0}' is closed")]
    TargetClosed(String),

    /// No target registered under the given id.
    #[error("no target registered for '{0}'")]
    NotFound(String),

    /// Notification delivery failed.
    #[error("notification failed: {0}")]
    Notify(String),

    /// A background blocking task could not be joined.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an IO error whose context names a path.
    pub fn io_at(action: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        Self::Io {
            context: format!("{action} {}", path.display()),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Create a disabled-target error.
    pub fn target_disabled(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TargetDisabled {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error is a guard conflict rather than a failure.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::MaintenanceInProgress { .. })
    }

    /// Returns the IO error kind, if this is an IO error.
    #[must_use]
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}
