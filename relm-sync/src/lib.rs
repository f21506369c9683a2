//! # relm-sync
//!
//! Reconciliation of a state store against the live release set.
//!
//! A pass lists live releases from a [`ReleaseSource`], lists stored
//! identifiers from a [`StateStore`], computes a [`Delta`] with [`diff`], and
//! applies the writes and deletes concurrently under a bounded worker pool.
//! Per-item failures are counted through a [`MetricsSink`] and reported in the
//! [`PassReport`]; only failing to read either side fails the pass.

pub mod diff;
pub mod error;
pub mod fs_store;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod reconciler;
pub mod report;
pub mod reporter;
pub mod source;
pub mod store;

pub use diff::{diff, Delta};
pub use error::{PassError, SourceError, StoreError};
pub use fs_store::FsStateStore;
pub use metrics::{Counter, CounterSnapshot, Counters, MetricsError, MetricsSink};
pub use pipeline::{PassOutcome, Pipeline};
pub use reconciler::Reconciler;
pub use report::{ItemOp, ItemOutcome, PassReport};
pub use reporter::DryRunReporter;
pub use source::{HelmSource, ManifestSource, ReleaseSource};
pub use store::{Snapshot, StateStore};
