//! Stored-identifier mapping.
//!
//! The identifier is a function of the release name and namespace only, so a
//! release whose payload changes keeps its identifier. Namespaces are
//! DNS-1123 labels and release names are DNS-1123 subdomains, so neither
//! ever contains `_`, which keeps the `<namespace>_<name>` form
//! collision-free.

use crate::types::{Release, StoredId};

/// Separator between namespace and name.
pub const NAMESPACE_SEPARATOR: char = '_';

/// Identifier under which `release` is stored.
pub fn identity(release: &Release) -> StoredId {
    match release.namespace() {
        Some(ns) => StoredId(format!("{ns}{NAMESPACE_SEPARATOR}{}", release.name)),
        None => StoredId(release.name.0.clone()),
    }
}
