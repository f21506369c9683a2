//! Filesystem-backed state store.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   snapshot.json          (last pass bookkeeping)
//!   releases/
//!     <stored_id>.json     (one pretty-printed release per file)
//! ```
//!
//! Writes go to `<path>.tmp` and are renamed into place, so a reader never
//! observes a half-written record. Listing skips anything that is not a
//! `.json` file, including `.tmp` leftovers from an interrupted write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use relm_core::{identity, Release, Scope, StoredId};

use crate::error::{store_io_err, StoreError};
use crate::store::{Snapshot, StateStore};

const RECORD_EXTENSION: &str = "json";

/// Stores release records as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/releases`
    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    /// `<root>/snapshot.json`
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join("snapshot.json")
    }

    /// `<root>/releases/<id>.json`, rejecting ids that would escape the
    /// releases directory.
    pub fn record_path(&self, id: &StoredId) -> Result<PathBuf, StoreError> {
        let raw = id.as_str();
        if raw.is_empty() || raw.starts_with('.') || raw.contains(['/', '\\']) {
            return Err(StoreError::InvalidId { id: id.clone() });
        }
        Ok(self
            .releases_dir()
            .join(format!("{raw}.{RECORD_EXTENSION}")))
    }

    /// Read back a stored record.
    pub async fn read_release(&self, id: &StoredId) -> Result<Release, StoreError> {
        let path = self.record_path(id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.clone() })
            }
            Err(err) => return Err(store_io_err(&path, err)),
        };
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Write `contents` to `<path>.tmp`, then rename to `path`.
async fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(store_io_err(
            path,
            std::io::Error::other("invalid state store path"),
        ));
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| store_io_err(dir, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| store_io_err(&tmp, e))?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(store_io_err(path, err));
    }
    Ok(())
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn list_stored_ids(&self) -> Result<Vec<StoredId>, StoreError> {
        let dir = self.releases_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(store_io_err(&dir, err)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_io_err(&dir, e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| store_io_err(&path, e))?
                .is_file();
            if !is_file || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(StoredId::from(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn write_release(&self, release: &Release) -> Result<(), StoreError> {
        let id = identity(release);
        let path = self.record_path(&id)?;
        let json = serde_json::to_vec_pretty(release)?;
        atomic_write(&path, &json).await?;
        tracing::debug!(id = %id, path = %path.display(), "wrote release record");
        Ok(())
    }

    async fn delete_release(&self, id: &StoredId) -> Result<(), StoreError> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(id = %id, "deleted release record");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound { id: id.clone() })
            }
            Err(err) => Err(store_io_err(&path, err)),
        }
    }

    async fn remove_all_state(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_io_err(&self.root, err)),
        }
    }

    async fn update_snapshot(
        &self,
        releases: &[Release],
        scope: &Scope,
    ) -> Result<(), StoreError> {
        let snapshot = Snapshot::capture(releases, scope);
        let json = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.snapshot_path(), &json).await
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let path = self.snapshot_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(store_io_err(&path, err)),
        }
    }
}
