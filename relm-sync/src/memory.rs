//! In-memory source and store.
//!
//! Both record every call they receive and accept injected failures, which
//! makes them the doubles used across the workspace's tests. The store also
//! tracks how many mutating calls are in flight at once.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use relm_core::{identity, Release, Scope, StoredId};

use crate::error::{SourceError, StoreError};
use crate::source::ReleaseSource;
use crate::store::{Snapshot, StateStore};

// ---------------------------------------------------------------------------
// StaticReleaseSource
// ---------------------------------------------------------------------------

/// A release source that replays scripted responses.
///
/// Scripted responses are consumed first, in order; once exhausted every
/// call returns the current release list.
#[derive(Debug, Default)]
pub struct StaticReleaseSource {
    inner: Mutex<SourceInner>,
}

#[derive(Debug, Default)]
struct SourceInner {
    releases: Vec<Release>,
    script: VecDeque<Result<Vec<Release>, String>>,
    calls: Vec<Instant>,
}

impl StaticReleaseSource {
    pub fn new(releases: Vec<Release>) -> Self {
        Self {
            inner: Mutex::new(SourceInner {
                releases,
                ..SourceInner::default()
            }),
        }
    }

    /// Queue a one-off response ahead of the steady-state list.
    pub fn push_response(&self, response: Result<Vec<Release>, String>) {
        self.inner.lock().script.push_back(response);
    }

    /// Queue a one-off failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.push_response(Err(message.into()));
    }

    pub fn set_releases(&self, releases: Vec<Release>) {
        self.inner.lock().releases = releases;
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// When each call arrived.
    pub fn call_times(&self) -> Vec<Instant> {
        self.inner.lock().calls.clone()
    }
}

#[async_trait]
impl ReleaseSource for StaticReleaseSource {
    async fn list_installed_releases(&self) -> Result<Vec<Release>, SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Instant::now());
        match inner.script.pop_front() {
            Some(Ok(releases)) => Ok(releases),
            Some(Err(message)) => Err(SourceError::Unavailable(message)),
            None => Ok(inner.releases.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// One call received by [`MemoryStateStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List,
    Write(StoredId),
    Delete(StoredId),
    RemoveAll,
    UpdateSnapshot,
    LoadSnapshot,
}

impl StoreCall {
    /// Whether the call changes stored state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StoreCall::Write(_) | StoreCall::Delete(_) | StoreCall::RemoveAll
        )
    }
}

/// A state store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<StoreInner>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoreInner {
    ids: BTreeSet<StoredId>,
    snapshot: Option<Snapshot>,
    calls: Vec<StoreCall>,
    failing_writes: HashSet<StoredId>,
    failing_deletes: HashSet<StoredId>,
    fail_list: bool,
    fail_snapshot: bool,
    fail_remove_all: bool,
    in_flight: usize,
    max_in_flight: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds records under `ids`.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StoredId>,
    {
        let store = Self::new();
        store.inner.lock().ids = ids.into_iter().map(Into::into).collect();
        store
    }

    /// Make every write and delete take `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_write(&self, id: impl Into<StoredId>) {
        self.inner.lock().failing_writes.insert(id.into());
    }

    pub fn fail_delete(&self, id: impl Into<StoredId>) {
        self.inner.lock().failing_deletes.insert(id.into());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inner.lock().fail_list = fail;
    }

    pub fn fail_snapshot(&self, fail: bool) {
        self.inner.lock().fail_snapshot = fail;
    }

    pub fn fail_remove_all(&self, fail: bool) {
        self.inner.lock().fail_remove_all = fail;
    }

    pub fn set_snapshot(&self, snapshot: Option<Snapshot>) {
        self.inner.lock().snapshot = snapshot;
    }

    pub fn stored_ids(&self) -> Vec<StoredId> {
        self.inner.lock().ids.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.lock().snapshot.clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }

    /// Highest number of writes and deletes observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().max_in_flight
    }

    /// Writes and deletes currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    fn record(&self, call: StoreCall) {
        self.inner.lock().calls.push(call);
    }

    async fn mutate<F>(&self, call: StoreCall, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreInner) -> Result<(), StoreError>,
    {
        {
            let mut inner = self.inner.lock();
            inner.calls.push(call);
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        let guard = InFlightGuard(&self.inner);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        drop(guard);
        apply(&mut self.inner.lock())
    }
}

/// Releases an in-flight slot even when the mutating future is dropped.
struct InFlightGuard<'a>(&'a Mutex<StoreInner>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn list_stored_ids(&self) -> Result<Vec<StoredId>, StoreError> {
        self.record(StoreCall::List);
        let inner = self.inner.lock();
        if inner.fail_list {
            return Err(StoreError::Unavailable("listing disabled".into()));
        }
        Ok(inner.ids.iter().cloned().collect())
    }

    async fn write_release(&self, release: &Release) -> Result<(), StoreError> {
        let id = identity(release);
        self.mutate(StoreCall::Write(id.clone()), move |inner| {
            if inner.failing_writes.contains(&id) {
                return Err(StoreError::Unavailable(format!("write of '{id}' refused")));
            }
            inner.ids.insert(id);
            Ok(())
        })
        .await
    }

    async fn delete_release(&self, id: &StoredId) -> Result<(), StoreError> {
        let id = id.clone();
        self.mutate(StoreCall::Delete(id.clone()), move |inner| {
            if inner.failing_deletes.contains(&id) {
                return Err(StoreError::Unavailable(format!("delete of '{id}' refused")));
            }
            if !inner.ids.remove(&id) {
                return Err(StoreError::NotFound { id });
            }
            Ok(())
        })
        .await
    }

    async fn remove_all_state(&self) -> Result<(), StoreError> {
        self.mutate(StoreCall::RemoveAll, |inner| {
            if inner.fail_remove_all {
                return Err(StoreError::Unavailable("remove all refused".into()));
            }
            inner.ids.clear();
            inner.snapshot = None;
            Ok(())
        })
        .await
    }

    async fn update_snapshot(
        &self,
        releases: &[Release],
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::UpdateSnapshot);
        let mut inner = self.inner.lock();
        if inner.fail_snapshot {
            return Err(StoreError::Unavailable("snapshot refused".into()));
        }
        inner.snapshot = Some(Snapshot::capture(releases, scope));
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        self.record(StoreCall::LoadSnapshot);
        let inner = self.inner.lock();
        if inner.fail_snapshot {
            return Err(StoreError::Unavailable("snapshot refused".into()));
        }
        Ok(inner.snapshot.clone())
    }
}
