use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use relm_core::{ExportConfig, RunMode, Scope, Strategy};
use relm_sync::{
    source, Counters, FsStateStore, PassOutcome, Pipeline, ReleaseSource, StateStore,
};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_METRICS, CMD_PASS, CMD_STATUS, CMD_STOP};

const TRIGGER_SCHEDULE: &str = "schedule";
const TRIGGER_SOCKET: &str = "socket";

struct PassJob {
    respond_to: oneshot::Sender<Result<PassSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub trigger: String,
    pub scope: String,
    pub dry_run: bool,
    /// Live releases in scope (printed, for a dry run).
    pub releases: usize,
    pub written: usize,
    pub deleted: usize,
    pub failed: usize,
    pub duration_ms: u128,
    pub finished_at_unix: u64,
}

#[derive(Debug, Default)]
struct RunnerStatus {
    passes: u64,
    last_pass: Option<PassSummary>,
    last_error: Option<String>,
}

/// Read-mostly state shared by the scheduler and socket clients.
struct Shared {
    started_at_unix: u64,
    interval: Duration,
    scope: String,
    dry_run: bool,
    socket: Option<PathBuf>,
    counters: Arc<Counters>,
    status: RwLock<RunnerStatus>,
}

/// Drives passes for one [`ExportConfig`], once or on an interval.
pub struct Runner {
    config: ExportConfig,
    pipeline: Pipeline,
    store: Arc<dyn StateStore>,
    counters: Arc<Counters>,
}

impl Runner {
    pub fn new(
        config: ExportConfig,
        source: Arc<dyn ReleaseSource>,
        store: Arc<dyn StateStore>,
        counters: Arc<Counters>,
    ) -> Self {
        let pipeline = Pipeline::new(&config, source, store.clone(), counters.clone());
        Self {
            config,
            pipeline,
            store,
            counters,
        }
    }

    /// Wire the configured release source to a filesystem store at
    /// `config.state_dir`.
    pub fn from_config(config: ExportConfig) -> Result<Self, DaemonError> {
        let source = source::from_config(&config.source);
        let store = Arc::new(FsStateStore::new(&config.state_dir));
        let counters = Arc::new(Counters::new()?);
        Ok(Self::new(config, source, store, counters))
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Run according to the configured mode. Single-shot returns the pass
    /// error; the daemon only returns once shut down.
    pub async fn run(self) -> Result<(), DaemonError> {
        let interval = match self.config.mode {
            RunMode::SingleShot => return self.run_once().await.map(|_| ()),
            RunMode::Daemon { interval } => interval,
        };

        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let signal_handle = {
            let shutdown = shutdown_tx.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_rx.recv() => Ok(()),
                    signal = tokio::signal::ctrl_c() => {
                        match signal {
                            Ok(()) => {
                                tracing::info!("received ctrl-c, shutting down");
                                let _ = shutdown.send(());
                                Ok(())
                            }
                            Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                        }
                    }
                }
            })
        };

        let result = self.run_daemon(interval, shutdown_tx.clone()).await;
        let _ = shutdown_tx.send(());
        handle_join("signal_handler", signal_handle.await)?;
        result
    }

    /// Scope cleanup followed by exactly one pass.
    pub async fn run_once(&self) -> Result<PassOutcome, DaemonError> {
        self.cleanup().await;
        Ok(self.pipeline.run().await?)
    }

    /// Poll until `shutdown` fires. Pass errors are logged and never end the
    /// loop.
    pub async fn run_daemon(
        self,
        interval: Duration,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(), DaemonError> {
        self.cleanup().await;

        let shared = Arc::new(Shared {
            started_at_unix: unix_seconds_now(),
            interval,
            scope: self.pipeline.scope().label(),
            dry_run: matches!(self.pipeline.strategy(), Strategy::DryRun { .. }),
            socket: self.config.socket.clone(),
            counters: self.counters.clone(),
            status: RwLock::new(RunnerStatus::default()),
        });
        let (pass_tx, pass_rx) = mpsc::channel::<PassJob>(16);

        tracing::info!(
            interval_secs = interval.as_secs(),
            scope = %shared.scope,
            dry_run = shared.dry_run,
            "daemon started"
        );

        let scheduler_handle = {
            let shutdown = shutdown_tx.clone();
            let shutdown_rx = shutdown.subscribe();
            let pipeline = self.pipeline.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                let result = scheduler_task(pipeline, shared, interval, pass_rx, shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let socket_handle = self.config.socket.clone().map(|socket| {
            let shutdown = shutdown_tx.clone();
            let shutdown_rx = shutdown.subscribe();
            let shared = shared.clone();
            tokio::spawn(async move {
                let result =
                    socket_server_task(socket, shared, pass_tx, shutdown.clone(), shutdown_rx)
                        .await;
                let _ = shutdown.send(());
                result
            })
        });

        let scheduler_result = scheduler_handle.await;
        let socket_result = match socket_handle {
            Some(handle) => handle.await,
            None => Ok(Ok(())),
        };

        handle_join("scheduler", scheduler_result)?;
        handle_join("socket_server", socket_result)?;
        tracing::info!("daemon stopped");
        Ok(())
    }

    async fn cleanup(&self) {
        if matches!(self.pipeline.strategy(), Strategy::Export) && self.pipeline.scope().is_scoped()
        {
            cleanup_prior_scope(self.store.as_ref(), self.pipeline.scope()).await;
        }
    }
}

/// Start the runner on a fresh multi-threaded runtime and block until it
/// exits.
pub fn start_blocking(runner: Runner) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(runner.run())
}

/// Run a single pass on a fresh runtime, returning its outcome.
pub fn run_once_blocking(runner: &Runner) -> Result<PassOutcome, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(runner.run_once())
}

/// Remove stored state left by a different export scope. Returns whether the
/// state was removed. Failures are warnings only.
pub async fn cleanup_prior_scope(store: &dyn StateStore, scope: &Scope) -> bool {
    match store.load_snapshot().await {
        Ok(Some(snapshot)) if snapshot.is_for(scope) => return false,
        Ok(Some(snapshot)) => {
            tracing::info!(prior = %snapshot.scope, scope = %scope, "export scope changed, removing prior state");
        }
        Ok(None) => {
            tracing::info!(scope = %scope, "no snapshot found, removing prior state");
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to read snapshot, removing prior state");
        }
    }

    match store.remove_all_state().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "failed to remove prior state");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

async fn scheduler_task(
    pipeline: Pipeline,
    shared: Arc<Shared>,
    interval: Duration,
    mut pass_rx: mpsc::Receiver<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut requests_open = true;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = execute(&pipeline, &shared, TRIGGER_SCHEDULE) => {}
        }

        let next = tokio::time::sleep(interval);
        tokio::pin!(next);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                _ = &mut next => break,
                job = pass_rx.recv(), if requests_open => {
                    let Some(job) = job else {
                        requests_open = false;
                        continue;
                    };
                    let outcome = tokio::select! {
                        _ = shutdown_rx.recv() => return Ok(()),
                        outcome = execute(&pipeline, &shared, TRIGGER_SOCKET) => outcome,
                    };
                    let _ = job.respond_to.send(outcome);
                    next.as_mut().reset(Instant::now() + interval);
                }
            }
        }
    }

    Ok(())
}

async fn execute(
    pipeline: &Pipeline,
    shared: &Shared,
    trigger: &'static str,
) -> Result<PassSummary, String> {
    let started = Instant::now();
    let result = pipeline.run().await;

    let mut status = shared.status.write().await;
    status.passes += 1;
    match result {
        Ok(outcome) => {
            let summary = build_pass_summary(trigger, pipeline.scope(), &outcome, started.elapsed());
            status.last_pass = Some(summary.clone());
            status.last_error = None;
            Ok(summary)
        }
        Err(err) => {
            tracing::error!(trigger, error = %err, "pass failed");
            status.last_error = Some(err.to_string());
            Err(err.to_string())
        }
    }
}

pub fn build_pass_summary(
    trigger: &str,
    scope: &Scope,
    outcome: &PassOutcome,
    duration: Duration,
) -> PassSummary {
    let (dry_run, releases, written, deleted, failed) = match outcome {
        PassOutcome::Reported { releases } => (true, *releases, 0, 0, 0),
        PassOutcome::Exported(report) => (
            false,
            report.live,
            report.written(),
            report.deleted(),
            report.failed(),
        ),
    };

    PassSummary {
        trigger: trigger.to_string(),
        scope: scope.label(),
        dry_run,
        releases,
        written,
        deleted,
        failed,
        duration_ms: duration.as_millis(),
        finished_at_unix: unix_seconds_now(),
    }
}

async fn enqueue_pass(pass_tx: &mpsc::Sender<PassJob>) -> Result<PassSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    pass_tx
        .send(PassJob { respond_to: tx })
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass queue"))?;
    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    socket: PathBuf,
    shared: Arc<Shared>,
    pass_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if let Some(parent) = socket.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let pass_tx = pass_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, pass_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    shared: Arc<Shared>,
    pass_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            CMD_STATUS => DaemonResponse::ok(build_status_payload(&shared).await),
            CMD_PASS => match enqueue_pass(&pass_tx).await {
                Ok(summary) => DaemonResponse::ok(json!(summary)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_METRICS => match shared.counters.render_prometheus() {
                Ok(text) => DaemonResponse::ok(json!({ "text": text })),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_STOP => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };
        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }
    Ok(())
}

async fn build_status_payload(shared: &Shared) -> Value {
    let status = shared.status.read().await;
    json!({
        "running": true,
        "started_at_unix": shared.started_at_unix,
        "interval_secs": shared.interval.as_secs(),
        "scope": shared.scope,
        "dry_run": shared.dry_run,
        "passes": status.passes,
        "last_pass": status.last_pass,
        "last_error": status.last_error,
        "counters": shared.counters.snapshot(),
        "socket": shared.socket.as_ref().map(|s| s.display().to_string()),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
