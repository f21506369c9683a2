//! Error types for relm-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use relm_core::StoredId;

/// Failures listing live releases.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The release tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The release tool ran but reported failure.
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: PathBuf,
        status: String,
        stderr: String,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("release list JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("release list YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The source is reachable but cannot answer right now.
    #[error("release source unavailable: {0}")]
    Unavailable(String),
}

/// Failures reading or mutating the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delete of a record that is not in the store.
    #[error("no stored release with id '{id}'")]
    NotFound { id: StoredId },

    /// An identifier that cannot name a record (path separators, leading dot).
    #[error("invalid stored release id '{id}'")]
    InvalidId { id: StoredId },

    /// The backend refused the operation.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Failures that abort a whole reconciliation pass.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("failed to list installed releases: {0}")]
    Source(#[from] SourceError),

    #[error("failed to list stored releases: {0}")]
    Store(#[from] StoreError),

    #[error("reconciliation pass exceeded its {0:?} deadline")]
    TimedOut(Duration),

    /// Dry-run output could not be written.
    #[error("failed to write report: {0}")]
    Output(#[source] std::io::Error),
}

pub(crate) fn source_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
