//! Drives a running daemon over its Unix control socket.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relm_core::config::ExportOptions;
use relm_core::ExportConfig;
use relm_daemon::{
    request_metrics, request_pass, request_status, request_stop, send_request, DaemonError,
    DaemonRequest, Runner,
};
use relm_sync::{Counters, FsStateStore, ManifestSource};
use tempfile::TempDir;
use tokio::sync::broadcast;

const MANIFEST: &str = r#"[
  {"name": "api", "namespace": "prod", "revision": "4", "status": "deployed", "chart": "api-2.1.0", "app_version": "2.1.0"},
  {"name": "web", "namespace": "prod", "revision": "9", "status": "deployed", "chart": "web-0.3.0", "app_version": "0.3.0"}
]"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("releases.json"), MANIFEST).expect("manifest");
        Self { dir }
    }

    fn socket(&self) -> PathBuf {
        self.dir.path().join("run").join("relm.sock")
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn runner(&self) -> Runner {
        let options = ExportOptions {
            daemon: true,
            interval_secs: 3600,
            state_dir: Some(self.state_dir()),
            manifest: Some(self.dir.path().join("releases.json")),
            socket: Some(self.socket()),
            ..ExportOptions::default()
        };
        let config = ExportConfig::from_options_at(options, self.dir.path()).expect("config");
        Runner::new(
            config,
            Arc::new(ManifestSource::new(self.dir.path().join("releases.json"))),
            Arc::new(FsStateStore::new(self.state_dir())),
            Arc::new(Counters::new().expect("counters")),
        )
    }
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("blocking client")
}

async fn wait_for_socket(socket: &Path) {
    for _ in 0..100 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_pass_metrics_and_stop() {
    let fixture = Fixture::new();
    let socket = fixture.socket();
    let (shutdown_tx, _) = broadcast::channel(4);
    let daemon = tokio::spawn(fixture.runner().run_daemon(Duration::from_secs(3600), shutdown_tx));

    wait_for_socket(&socket).await;

    let status = blocking({
        let socket = socket.clone();
        move || request_status(&socket)
    })
    .await
    .expect("status");
    assert_eq!(status["running"], serde_json::json!(true));
    assert_eq!(status["scope"], serde_json::json!("all"));

    let summary = blocking({
        let socket = socket.clone();
        move || request_pass(&socket)
    })
    .await
    .expect("pass");
    assert_eq!(summary["trigger"], serde_json::json!("socket"));
    assert_eq!(summary["releases"], serde_json::json!(2));
    assert!(fixture.state_dir().join("releases").join("prod_api.json").exists());

    let metrics = blocking({
        let socket = socket.clone();
        move || request_metrics(&socket)
    })
    .await
    .expect("metrics");
    assert!(metrics.contains("relm_upload_success_total 2"), "{metrics}");

    blocking({
        let socket = socket.clone();
        move || request_stop(&socket)
    })
    .await
    .expect("stop");

    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon stops")
        .expect("join")
        .expect("daemon result");
    assert!(!socket.exists(), "socket removed on shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_is_an_error_response() {
    let fixture = Fixture::new();
    let socket = fixture.socket();
    let (shutdown_tx, _) = broadcast::channel(4);
    let daemon = tokio::spawn(
        fixture
            .runner()
            .run_daemon(Duration::from_secs(3600), shutdown_tx.clone()),
    );

    wait_for_socket(&socket).await;

    let response = blocking({
        let socket = socket.clone();
        move || send_request(&socket, &DaemonRequest::new("reboot"))
    })
    .await
    .expect("response");
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("unknown command 'reboot'"));

    shutdown_tx.send(()).expect("daemon listening");
    daemon.await.expect("join").expect("daemon result");
}

#[test]
fn stop_without_daemon_reports_not_running() {
    let dir = TempDir::new().expect("tempdir");
    let err = request_stop(&dir.path().join("relm.sock")).unwrap_err();
    assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
}
