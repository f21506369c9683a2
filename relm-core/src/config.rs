//! Export configuration.
//!
//! [`ExportOptions`] is the flat, unvalidated shape the CLI fills in from
//! flags and environment variables. [`ExportConfig::from_options_at`] turns it
//! into the validated form the runner consumes.
//!
//! As in the rest of the workspace, functions that touch the home directory
//! come in two forms: `fn_at(home, …)` for tests and `fn(…)` which resolves
//! `dirs::home_dir()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{ReleaseName, Scope};

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_PASS_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HELM_BIN: &str = "helm";

/// Whether the process runs one pass or polls forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    SingleShot,
    Daemon { interval: Duration },
}

/// What a pass does with the live release set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Print the live releases; never touch the store.
    DryRun { verbose: bool },
    /// Reconcile the store against the live releases.
    Export,
}

/// Where live releases come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    /// Shell out to the helm binary.
    Helm {
        binary: PathBuf,
        kube_context: Option<String>,
    },
    /// Read a `helm list -o json` (or yaml) document from disk.
    Manifest(PathBuf),
}

/// Unvalidated options as collected from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub dry_run: bool,
    pub daemon: bool,
    pub interval_secs: u64,
    pub release_name: Option<String>,
    pub verbose: bool,
    pub state_dir: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub helm_bin: PathBuf,
    pub kube_context: Option<String>,
    pub max_concurrency: usize,
    /// `0` disables the per-pass deadline.
    pub pass_timeout_secs: u64,
    pub socket: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            daemon: false,
            interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            release_name: None,
            verbose: false,
            state_dir: None,
            manifest: None,
            helm_bin: PathBuf::from(DEFAULT_HELM_BIN),
            kube_context: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            pass_timeout_secs: DEFAULT_PASS_TIMEOUT_SECS,
            socket: None,
        }
    }
}

/// Validated export configuration. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub mode: RunMode,
    pub strategy: Strategy,
    pub scope: Scope,
    pub state_dir: PathBuf,
    pub source: SourceConfig,
    pub max_concurrency: usize,
    pub pass_timeout: Option<Duration>,
    pub socket: Option<PathBuf>,
}

impl ExportConfig {
    /// Validate `options`, resolving the default state directory under `home`.
    pub fn from_options_at(options: ExportOptions, home: &Path) -> Result<Self, ConfigError> {
        let state_dir = options
            .state_dir
            .clone()
            .unwrap_or_else(|| default_state_dir_at(home));
        Self::build(options, state_dir)
    }

    /// `from_options_at` convenience wrapper; only needs `$HOME` when no
    /// state directory was given.
    pub fn from_options(options: ExportOptions) -> Result<Self, ConfigError> {
        let state_dir = match options.state_dir.clone() {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        Self::build(options, state_dir)
    }

    fn build(options: ExportOptions, state_dir: PathBuf) -> Result<Self, ConfigError> {
        if options.interval_secs < 1 {
            return Err(ConfigError::InvalidInterval(options.interval_secs));
        }
        if options.max_concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency(options.max_concurrency));
        }

        let scope = Scope::from_release_name(options.release_name.as_deref());
        if let Scope::Release(name) = &scope {
            if !name.is_valid() {
                return Err(ConfigError::InvalidReleaseName(name.0.clone()));
            }
        }

        let mode = if options.daemon {
            RunMode::Daemon {
                interval: Duration::from_secs(options.interval_secs),
            }
        } else {
            RunMode::SingleShot
        };

        let strategy = if options.dry_run {
            Strategy::DryRun {
                verbose: options.verbose,
            }
        } else {
            Strategy::Export
        };

        let source = match options.manifest {
            Some(path) => SourceConfig::Manifest(path),
            None => SourceConfig::Helm {
                binary: options.helm_bin,
                kube_context: options.kube_context.filter(|ctx| !ctx.is_empty()),
            },
        };

        let pass_timeout =
            (options.pass_timeout_secs > 0).then(|| Duration::from_secs(options.pass_timeout_secs));

        Ok(Self {
            mode,
            strategy,
            scope,
            state_dir,
            source,
            max_concurrency: options.max_concurrency,
            pass_timeout,
            socket: options.socket,
        })
    }

    /// The scoped release name, if any.
    pub fn release_name(&self) -> Option<&ReleaseName> {
        match &self.scope {
            Scope::Release(name) => Some(name),
            Scope::All => None,
        }
    }
}

/// `<home>/.relm/state`
pub fn default_state_dir_at(home: &Path) -> PathBuf {
    home.join(".relm").join("state")
}

/// `default_state_dir_at` convenience wrapper.
pub fn default_state_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(default_state_dir_at(&home))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> PathBuf {
        PathBuf::from("/home/relm")
    }

    #[test]
    fn defaults_are_single_shot_export_over_helm() {
        let config = ExportConfig::from_options_at(ExportOptions::default(), &home()).unwrap();
        assert_eq!(config.mode, RunMode::SingleShot);
        assert_eq!(config.strategy, Strategy::Export);
        assert_eq!(config.scope, Scope::All);
        assert_eq!(config.state_dir, PathBuf::from("/home/relm/.relm/state"));
        assert_eq!(
            config.source,
            SourceConfig::Helm {
                binary: PathBuf::from("helm"),
                kube_context: None
            }
        );
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(
            config.pass_timeout,
            Some(Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS))
        );
    }

    #[test]
    fn daemon_mode_carries_interval() {
        let options = ExportOptions {
            daemon: true,
            interval_secs: 5,
            ..ExportOptions::default()
        };
        let config = ExportConfig::from_options_at(options, &home()).unwrap();
        assert_eq!(
            config.mode,
            RunMode::Daemon {
                interval: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let options = ExportOptions {
            interval_secs: 0,
            ..ExportOptions::default()
        };
        let err = ExportConfig::from_options_at(options, &home()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidInterval(0));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let options = ExportOptions {
            max_concurrency: 0,
            ..ExportOptions::default()
        };
        let err = ExportConfig::from_options_at(options, &home()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidConcurrency(0));
    }

    #[test]
    fn invalid_scoped_name_is_rejected() {
        let options = ExportOptions {
            release_name: Some("Not_Valid".into()),
            ..ExportOptions::default()
        };
        let err = ExportConfig::from_options_at(options, &home()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReleaseName(name) if name == "Not_Valid"));
    }

    #[test]
    fn dotted_scoped_name_is_accepted() {
        let options = ExportOptions {
            release_name: Some("my.app".into()),
            ..ExportOptions::default()
        };
        let config = ExportConfig::from_options_at(options, &home()).unwrap();
        assert_eq!(config.release_name(), Some(&ReleaseName::from("my.app")));
    }

    #[test]
    fn dry_run_verbose_and_manifest_source() {
        let options = ExportOptions {
            dry_run: true,
            verbose: true,
            manifest: Some(PathBuf::from("/tmp/releases.json")),
            release_name: Some("api".into()),
            pass_timeout_secs: 0,
            ..ExportOptions::default()
        };
        let config = ExportConfig::from_options_at(options, &home()).unwrap();
        assert_eq!(config.strategy, Strategy::DryRun { verbose: true });
        assert_eq!(
            config.source,
            SourceConfig::Manifest(PathBuf::from("/tmp/releases.json"))
        );
        assert_eq!(config.release_name(), Some(&ReleaseName::from("api")));
        assert_eq!(config.pass_timeout, None);
    }

    #[test]
    fn explicit_state_dir_wins() {
        let options = ExportOptions {
            state_dir: Some(PathBuf::from("/var/lib/relm")),
            ..ExportOptions::default()
        };
        let config = ExportConfig::from_options(options).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/relm"));
    }
}
