//! relm core library: release domain types, identity and export configuration.
//!
//! - [`types`]: newtypes, [`Release`], [`Scope`]
//! - [`identity`]: the stored-identifier mapping
//! - [`config`]: validated [`ExportConfig`]
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod identity;
pub mod types;

pub use config::{ExportConfig, RunMode, SourceConfig, Strategy};
pub use error::ConfigError;
pub use identity::identity;
pub use types::{Release, ReleaseName, Scope, StoredId};
