//! State store interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relm_core::{identity, Release, Scope, StoredId};

use crate::error::StoreError;

/// Bookkeeping record of the live set seen by the most recent pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub updated_at: DateTime<Utc>,
    /// [`Scope::label`] of the export that wrote this snapshot.
    pub scope: String,
    /// Sorted identifiers of the live releases.
    pub releases: Vec<StoredId>,
}

impl Snapshot {
    pub fn capture(releases: &[Release], scope: &Scope) -> Self {
        let mut ids: Vec<StoredId> = releases.iter().map(identity).collect();
        ids.sort();
        ids.dedup();
        Self {
            updated_at: Utc::now(),
            scope: scope.label(),
            releases: ids,
        }
    }

    pub fn is_for(&self, scope: &Scope) -> bool {
        self.scope == scope.label()
    }
}

/// Durable store of exported release records.
///
/// Implementations must accept concurrent calls for distinct identifiers.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Identifiers of every stored record, in no particular order.
    async fn list_stored_ids(&self) -> Result<Vec<StoredId>, StoreError>;

    /// Persist `release` under its identity, replacing any existing record.
    async fn write_release(&self, release: &Release) -> Result<(), StoreError>;

    /// Remove the record stored under `id`.
    async fn delete_release(&self, id: &StoredId) -> Result<(), StoreError>;

    /// Drop every record and the snapshot.
    async fn remove_all_state(&self) -> Result<(), StoreError>;

    /// Record what the current pass observed.
    async fn update_snapshot(&self, releases: &[Release], scope: &Scope)
        -> Result<(), StoreError>;

    /// The last snapshot written, if any.
    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError>;
}
