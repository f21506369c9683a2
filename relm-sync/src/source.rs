//! Live release sources.
//!
//! [`HelmSource`] asks the helm binary for deployed releases across all
//! namespaces. [`ManifestSource`] reads the same document from a file, which
//! is handy for air-gapped runs and for tests.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;

use relm_core::{Release, SourceConfig};

use crate::error::{source_io_err, SourceError};

/// Lists the releases currently installed in the cluster.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn list_installed_releases(&self) -> Result<Vec<Release>, SourceError>;
}

/// Build the source selected by configuration.
pub fn from_config(config: &SourceConfig) -> Arc<dyn ReleaseSource> {
    match config {
        SourceConfig::Helm {
            binary,
            kube_context,
        } => Arc::new(HelmSource::new(binary.clone(), kube_context.clone())),
        SourceConfig::Manifest(path) => Arc::new(ManifestSource::new(path.clone())),
    }
}

/// Document format of a release list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    Json,
    Yaml,
}

impl ListFormat {
    /// `.yaml` / `.yml` read as YAML; everything else as JSON.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ListFormat::Yaml
            }
            _ => ListFormat::Json,
        }
    }
}

/// Parse a `helm list` document. Blank input means no releases.
pub fn parse_release_list(raw: &str, format: ListFormat) -> Result<Vec<Release>, SourceError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let releases = match format {
        ListFormat::Json => serde_json::from_str(raw)?,
        ListFormat::Yaml => serde_yaml::from_str(raw)?,
    };
    Ok(releases)
}

// ---------------------------------------------------------------------------
// HelmSource
// ---------------------------------------------------------------------------

/// Runs `helm list` and parses its JSON output.
#[derive(Debug, Clone)]
pub struct HelmSource {
    binary: PathBuf,
    kube_context: Option<String>,
}

impl HelmSource {
    pub fn new(binary: impl Into<PathBuf>, kube_context: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            kube_context,
        }
    }

    /// Arguments passed to the helm binary.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "list",
            "--all-namespaces",
            "--deployed",
            "--max",
            "0",
            "--output",
            "json",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".into());
            args.push(context.into());
        }
        args
    }
}

#[async_trait]
impl ReleaseSource for HelmSource {
    async fn list_installed_releases(&self) -> Result<Vec<Release>, SourceError> {
        tracing::debug!(binary = %self.binary.display(), "listing installed releases");
        let output = tokio::process::Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::CommandFailed {
                program: self.binary.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_release_list(&stdout, ListFormat::Json)
    }
}

// ---------------------------------------------------------------------------
// ManifestSource
// ---------------------------------------------------------------------------

/// Reads a release list from a file on every call.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    path: PathBuf,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReleaseSource for ManifestSource {
    async fn list_installed_releases(&self) -> Result<Vec<Release>, SourceError> {
        tracing::debug!(path = %self.path.display(), "reading release manifest");
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| source_io_err(&self.path, e))?;
        parse_release_list(&raw, ListFormat::for_path(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const JSON_LIST: &str = r#"[
        {"name":"api","namespace":"prod","revision":"2","status":"deployed","chart":"api-1.0.0","app_version":"1.0.0","updated":"2024-01-01 00:00:00 +0000 UTC"},
        {"name":"worker","namespace":"prod","revision":"5","status":"deployed","chart":"worker-0.3.0","app_version":"0.3.0","updated":"2024-01-02 00:00:00 +0000 UTC"}
    ]"#;

    const YAML_LIST: &str = "\
- name: api
  namespace: prod
  revision: \"2\"
  status: deployed
  chart: api-1.0.0
  app_version: 1.0.0
  updated: 2024-01-01 00:00:00 +0000 UTC
";

    #[test]
    fn blank_output_means_no_releases() {
        assert!(parse_release_list("  \n", ListFormat::Json)
            .unwrap()
            .is_empty());
        assert!(parse_release_list("[]", ListFormat::Json)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = parse_release_list("{not json", ListFormat::Json).unwrap_err();
        assert!(matches!(err, SourceError::Json(_)), "got: {err}");
    }

    #[test]
    fn yaml_list_parses() {
        let releases = parse_release_list(YAML_LIST, ListFormat::Yaml).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].revision, 2);
        assert_eq!(releases[0].app_version, "1.0.0");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ListFormat::for_path(Path::new("r.yaml")), ListFormat::Yaml);
        assert_eq!(ListFormat::for_path(Path::new("r.YML")), ListFormat::Yaml);
        assert_eq!(ListFormat::for_path(Path::new("r.json")), ListFormat::Json);
        assert_eq!(ListFormat::for_path(Path::new("releases")), ListFormat::Json);
    }

    #[test]
    fn helm_args_include_context_when_set() {
        let plain = HelmSource::new("helm", None);
        assert!(!plain.args().contains(&OsString::from("--kube-context")));

        let scoped = HelmSource::new("helm", Some("prod-eu".into()));
        let args = scoped.args();
        assert_eq!(args[args.len() - 2], OsString::from("--kube-context"));
        assert_eq!(args[args.len() - 1], OsString::from("prod-eu"));
        assert!(args.contains(&OsString::from("--all-namespaces")));
    }

    #[tokio::test]
    async fn manifest_source_reads_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("releases.json");
        std::fs::write(&path, JSON_LIST).expect("write");

        let releases = ManifestSource::new(&path)
            .list_installed_releases()
            .await
            .expect("list");
        let names: Vec<_> = releases.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["api", "worker"]);
    }

    #[tokio::test]
    async fn missing_manifest_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("absent.json");
        let err = ManifestSource::new(&path)
            .list_installed_releases()
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[tokio::test]
    async fn missing_helm_binary_is_a_spawn_error() {
        let source = HelmSource::new("/nonexistent/relm-test/helm", None);
        let err = source.list_installed_releases().await.unwrap_err();
        assert!(matches!(err, SourceError::Spawn { .. }), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helm_failure_carries_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("tempdir");
        let fake = dir.path().join("helm");
        std::fs::write(&fake, "#!/bin/sh\necho 'Kubernetes cluster unreachable' >&2\nexit 1\n")
            .expect("write fake helm");
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let err = HelmSource::new(&fake, None)
            .list_installed_releases()
            .await
            .unwrap_err();
        match err {
            SourceError::CommandFailed { stderr, .. } => {
                assert_eq!(stderr, "Kubernetes cluster unreachable")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helm_output_is_parsed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("tempdir");
        let listing = dir.path().join("list.json");
        std::fs::write(&listing, JSON_LIST).expect("write listing");
        let fake = dir.path().join("helm");
        std::fs::write(&fake, format!("#!/bin/sh\ncat '{}'\n", listing.display()))
            .expect("write fake helm");
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let releases = HelmSource::new(&fake, None)
            .list_installed_releases()
            .await
            .expect("list");
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[1].revision, 5);
    }
}
