//! Error types for relm-core.

use thiserror::Error;

/// Errors raised while validating export configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The polling interval must be at least one second.
    #[error("polling interval must be at least 1 second (got {0})")]
    InvalidInterval(u64),

    /// The worker pool needs at least one permit.
    #[error("max concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    /// A scoped release name that is not a valid release name.
    #[error("invalid release name '{0}': expected a lowercase DNS-1123 label")]
    InvalidReleaseName(String),

    /// `dirs::home_dir()` returned `None` and no state directory was given.
    #[error("cannot determine home directory; pass --state-dir or set $HOME")]
    HomeNotFound,
}
