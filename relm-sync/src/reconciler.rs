//! One reconciliation pass.
//!
//! ## Pass protocol
//!
//! 1. List live releases (scope-filtered). Failure aborts the pass.
//! 2. List stored identifiers. Failure aborts the pass.
//! 3. Update the store snapshot. Failure is logged and counted only.
//! 4. Diff live against stored.
//! 5. Run the write phase and the delete phase concurrently. Every item is
//!    its own task; a shared semaphore caps how many run at once.
//! 6. Return a [`PassReport`]. Item failures never fail the pass.
//!
//! The whole pass runs under an optional deadline. When it expires the
//! in-flight item tasks are aborted with their `JoinSet`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use relm_core::config::DEFAULT_MAX_CONCURRENCY;
use relm_core::{identity, Release, Scope, StoredId};

use crate::diff::{diff, Delta};
use crate::error::{PassError, SourceError, StoreError};
use crate::metrics::{Counter, MetricsSink};
use crate::report::{ItemOp, ItemOutcome, PassReport};
use crate::source::ReleaseSource;
use crate::store::StateStore;

/// Reconciles a [`StateStore`] against a [`ReleaseSource`].
#[derive(Clone)]
pub struct Reconciler {
    source: Arc<dyn ReleaseSource>,
    store: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsSink>,
    scope: Scope,
    max_concurrency: usize,
    pass_timeout: Option<Duration>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        store: Arc<dyn StateStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            source,
            store,
            metrics,
            scope: Scope::All,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            pass_timeout: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Cap on concurrently running writes and deletes. Clamped to at least 1.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_pass_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pass_timeout = timeout;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Run one pass, honouring the configured deadline.
    pub async fn run_pass(&self) -> Result<PassReport, PassError> {
        let Some(limit) = self.pass_timeout else {
            return self.pass().await;
        };
        match tokio::time::timeout(limit, self.pass()).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.incr(Counter::JobError);
                tracing::warn!(timeout = ?limit, "reconciliation pass timed out");
                Err(PassError::TimedOut(limit))
            }
        }
    }

    async fn pass(&self) -> Result<PassReport, PassError> {
        let started = Instant::now();

        let current = match current_releases(self.source.as_ref(), &self.scope).await {
            Ok(current) => current,
            Err(err) => {
                self.metrics.incr(Counter::SourceError);
                self.metrics.incr(Counter::JobError);
                return Err(err.into());
            }
        };

        let stored = match self.store.list_stored_ids().await {
            Ok(stored) => stored,
            Err(err) => {
                self.metrics.incr(Counter::StoreError);
                self.metrics.incr(Counter::JobError);
                return Err(err.into());
            }
        };

        if let Err(err) = self.store.update_snapshot(&current, &self.scope).await {
            self.metrics.incr(Counter::SnapshotError);
            tracing::warn!(error = %err, "failed to update store snapshot");
        }

        let delta = diff(&current, &stored);
        tracing::debug!(
            to_write = delta.to_write.len(),
            to_delete = delta.to_delete.len(),
            "release delta computed"
        );

        let items = self.apply(delta).await;
        let report = PassReport {
            live: current.len(),
            stored: stored.len(),
            items,
            duration: started.elapsed(),
        };
        tracing::info!(
            scope = %self.scope,
            live = report.live,
            written = report.written(),
            deleted = report.deleted(),
            failed = report.failed(),
            duration_ms = report.duration.as_millis() as u64,
            "reconciliation pass completed"
        );
        Ok(report)
    }

    async fn apply(&self, delta: Delta) -> Vec<ItemOutcome> {
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let (mut writes, deletes) = tokio::join!(
            self.write_phase(delta.to_write, permits.clone()),
            self.delete_phase(delta.to_delete, permits),
        );
        writes.extend(deletes);
        writes
    }

    async fn write_phase(
        &self,
        releases: Vec<Release>,
        permits: Arc<Semaphore>,
    ) -> Vec<ItemOutcome> {
        let mut tasks = JoinSet::new();
        let mut pending = HashSet::new();
        for release in releases {
            let id = identity(&release);
            self.metrics.incr(Counter::JobCount);
            pending.insert(id.clone());

            let store = self.store.clone();
            let metrics = self.metrics.clone();
            tasks.spawn(with_permit(permits.clone(), async move {
                let result = store.write_release(&release).await;
                record_write(metrics.as_ref(), id, result)
            }));
        }
        join_phase(tasks, pending, ItemOp::Write, self.metrics.as_ref()).await
    }

    async fn delete_phase(
        &self,
        ids: Vec<StoredId>,
        permits: Arc<Semaphore>,
    ) -> Vec<ItemOutcome> {
        let mut tasks = JoinSet::new();
        let mut pending = HashSet::new();
        for id in ids {
            self.metrics.incr(Counter::JobCount);
            pending.insert(id.clone());

            let store = self.store.clone();
            let metrics = self.metrics.clone();
            tasks.spawn(with_permit(permits.clone(), async move {
                let result = store.delete_release(&id).await;
                record_delete(metrics.as_ref(), id, result)
            }));
        }
        join_phase(tasks, pending, ItemOp::Delete, self.metrics.as_ref()).await
    }
}

/// List live releases restricted to `scope`.
pub async fn current_releases(
    source: &dyn ReleaseSource,
    scope: &Scope,
) -> Result<Vec<Release>, SourceError> {
    let mut releases = source.list_installed_releases().await?;
    releases.retain(|release| scope.matches(release));
    Ok(releases)
}

async fn with_permit<F>(permits: Arc<Semaphore>, item: F) -> ItemOutcome
where
    F: Future<Output = ItemOutcome>,
{
    // Never closed; an acquire error would only mean running unthrottled.
    let _permit = permits.acquire_owned().await.ok();
    item.await
}

fn record_write(
    metrics: &dyn MetricsSink,
    id: StoredId,
    result: Result<(), StoreError>,
) -> ItemOutcome {
    match result {
        Ok(()) => {
            metrics.incr(Counter::UploadSuccess);
            ItemOutcome::ok(id, ItemOp::Write)
        }
        Err(err) => {
            metrics.incr(Counter::UploadError);
            metrics.incr(Counter::JobError);
            tracing::warn!(id = %id, error = %err, "failed to write release");
            ItemOutcome::failed(id, ItemOp::Write, err)
        }
    }
}

fn record_delete(
    metrics: &dyn MetricsSink,
    id: StoredId,
    result: Result<(), StoreError>,
) -> ItemOutcome {
    match result {
        Ok(()) => {
            metrics.incr(Counter::DeleteSuccess);
            ItemOutcome::ok(id, ItemOp::Delete)
        }
        Err(err) => {
            metrics.incr(Counter::DeleteError);
            metrics.incr(Counter::JobError);
            tracing::warn!(id = %id, error = %err, "failed to delete release");
            ItemOutcome::failed(id, ItemOp::Delete, err)
        }
    }
}

/// Wait for every task in the phase. Items whose task panicked have no
/// outcome of their own; they are reported as failures from `pending`.
async fn join_phase(
    mut tasks: JoinSet<ItemOutcome>,
    mut pending: HashSet<StoredId>,
    op: ItemOp,
    metrics: &dyn MetricsSink,
) -> Vec<ItemOutcome> {
    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                pending.remove(&outcome.id);
                outcomes.push(outcome);
            }
            Err(err) => tracing::error!(op = ?op, error = %err, "item task failed to complete"),
        }
    }

    let mut lost: Vec<StoredId> = pending.into_iter().collect();
    lost.sort();
    for id in lost {
        let counter = match op {
            ItemOp::Write => Counter::UploadError,
            ItemOp::Delete => Counter::DeleteError,
        };
        metrics.incr(counter);
        metrics.incr(Counter::JobError);
        outcomes.push(ItemOutcome::failed(id, op, "item task panicked"));
    }
    outcomes
}
