//! `relm export`: reconcile or report, once or as a polling daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use relm_core::config::{
    ExportOptions, DEFAULT_HELM_BIN, DEFAULT_MAX_CONCURRENCY, DEFAULT_PASS_TIMEOUT_SECS,
    DEFAULT_POLLING_INTERVAL_SECS,
};
use relm_core::{ExportConfig, RunMode};
use relm_daemon::{init_tracing, run_once_blocking, start_blocking, Runner};
use relm_sync::{PassOutcome, PassReport};

/// Arguments for `relm export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Print installed releases instead of exporting them. Never touches the store.
    #[arg(long, env = "RELM_DRY_RUN")]
    pub dry_run: bool,

    /// Keep running, one pass every `--interval` seconds.
    #[arg(long, env = "RELM_DAEMON")]
    pub daemon: bool,

    /// Seconds to sleep between daemon passes.
    #[arg(long, env = "RELM_POLLING_INTERVAL", default_value_t = DEFAULT_POLLING_INTERVAL_SECS)]
    pub interval: u64,

    /// Only track this release. Empty tracks every release.
    #[arg(long, env = "RELM_RELEASE_NAME")]
    pub release: Option<String>,

    /// Print chart, revision and status details in dry-run output.
    #[arg(long, short, env = "RELM_VERBOSE")]
    pub verbose: bool,

    /// State directory (default: ~/.relm/state).
    #[arg(long, env = "RELM_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Read releases from a `helm list -o json|yaml` file instead of running helm.
    #[arg(long, env = "RELM_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// helm binary to run.
    #[arg(long, env = "RELM_HELM_BIN", default_value = DEFAULT_HELM_BIN)]
    pub helm_bin: PathBuf,

    /// kubeconfig context passed to helm.
    #[arg(long, env = "RELM_KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    /// Upper bound on concurrent store writes and deletes.
    #[arg(long, env = "RELM_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Per-pass deadline in seconds; 0 disables it.
    #[arg(long, env = "RELM_PASS_TIMEOUT", default_value_t = DEFAULT_PASS_TIMEOUT_SECS)]
    pub pass_timeout: u64,

    /// Control socket for a daemon (see `relm daemon`).
    #[arg(long, env = "RELM_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RELM_LOG_JSON")]
    pub log_json: bool,
}

impl ExportArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.log_json);

        let config =
            ExportConfig::from_options(self.options()).context("invalid export configuration")?;
        let mode = config.mode;
        let runner = Runner::from_config(config).context("failed to set up export")?;

        match mode {
            RunMode::SingleShot => {
                let outcome = run_once_blocking(&runner).context("export pass failed")?;
                if let PassOutcome::Exported(report) = outcome {
                    print_report(&report);
                }
            }
            RunMode::Daemon { .. } => {
                start_blocking(runner).context("daemon exited with error")?;
            }
        }
        Ok(())
    }

    fn options(&self) -> ExportOptions {
        ExportOptions {
            dry_run: self.dry_run,
            daemon: self.daemon,
            interval_secs: self.interval,
            release_name: self.release.clone(),
            verbose: self.verbose,
            state_dir: self.state_dir.clone(),
            manifest: self.manifest.clone(),
            helm_bin: self.helm_bin.clone(),
            kube_context: self.kube_context.clone(),
            max_concurrency: self.max_concurrency,
            pass_timeout_secs: self.pass_timeout,
            socket: self.socket.clone(),
        }
    }
}

fn print_report(report: &PassReport) {
    if report.items.is_empty() {
        println!("✓ {} releases, nothing to do", report.live);
        return;
    }

    println!(
        "✓ {} releases exported ({} written, {} deleted, {} failed)",
        report.live,
        report.written(),
        report.deleted(),
        report.failed()
    );
    for failure in report.failures() {
        println!(
            "  ✗ {} {:?}: {}",
            failure.id,
            failure.op,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
}
