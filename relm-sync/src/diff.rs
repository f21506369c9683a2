//! Live-versus-stored set difference.
//!
//! Presence is decided by identifier alone. A live release whose identifier
//! is already stored is treated as up to date even if its payload changed.

use std::collections::HashSet;

use relm_core::{identity, Release, StoredId};

/// What a pass has to do to bring the store in line with the live set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Live releases with no stored record, in live order.
    pub to_write: Vec<Release>,
    /// Stored identifiers with no live release, in stored order.
    pub to_delete: Vec<StoredId>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_write.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the [`Delta`] between `current` and `stored` in linear time.
///
/// Duplicate identifiers on either side collapse to their first occurrence.
pub fn diff(current: &[Release], stored: &[StoredId]) -> Delta {
    tracing::debug!(
        current = current.len(),
        stored = stored.len(),
        "computing release delta"
    );

    let stored_set: HashSet<&StoredId> = stored.iter().collect();

    let mut live_ids = HashSet::with_capacity(current.len());
    let mut to_write = Vec::new();
    for release in current {
        let id = identity(release);
        if !stored_set.contains(&id) && !live_ids.contains(&id) {
            to_write.push(release.clone());
        }
        live_ids.insert(id);
    }

    let mut seen = HashSet::with_capacity(stored.len());
    let to_delete = stored
        .iter()
        .filter(|id| !live_ids.contains(*id) && seen.insert(*id))
        .cloned()
        .collect();

    Delta {
        to_write,
        to_delete,
    }
}
