//! Pass counters.
//!
//! The reconciler reports through the [`MetricsSink`] trait so callers can
//! inject their own sink. [`Counters`] is the in-process implementation:
//! one Prometheus `IntCounter` per [`Counter`], registered in a private
//! [`Registry`] and exposed in the Prometheus text format for scraping.

use std::fmt;
use std::string::FromUtf8Error;

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const COUNTER_COUNT: usize = 9;

/// Every counter a pass can increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// One per dispatched write or delete.
    JobCount,
    JobError,
    SourceError,
    StoreError,
    SnapshotError,
    UploadSuccess,
    UploadError,
    DeleteSuccess,
    DeleteError,
}

impl Counter {
    pub const ALL: [Counter; COUNTER_COUNT] = [
        Counter::JobCount,
        Counter::JobError,
        Counter::SourceError,
        Counter::StoreError,
        Counter::SnapshotError,
        Counter::UploadSuccess,
        Counter::UploadError,
        Counter::DeleteSuccess,
        Counter::DeleteError,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Exposition name.
    pub fn name(self) -> &'static str {
        match self {
            Counter::JobCount => "relm_job_count_total",
            Counter::JobError => "relm_job_error_total",
            Counter::SourceError => "relm_source_error_total",
            Counter::StoreError => "relm_store_error_total",
            Counter::SnapshotError => "relm_snapshot_error_total",
            Counter::UploadSuccess => "relm_upload_success_total",
            Counter::UploadError => "relm_upload_error_total",
            Counter::DeleteSuccess => "relm_delete_success_total",
            Counter::DeleteError => "relm_delete_error_total",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Counter::JobCount => "Release writes and deletes dispatched.",
            Counter::JobError => "Failed passes and failed release writes or deletes.",
            Counter::SourceError => "Failures listing installed releases.",
            Counter::StoreError => "Failures listing stored releases.",
            Counter::SnapshotError => "Failures updating the store snapshot.",
            Counter::UploadSuccess => "Release records written.",
            Counter::UploadError => "Release record writes that failed.",
            Counter::DeleteSuccess => "Release records deleted.",
            Counter::DeleteError => "Release record deletes that failed.",
        }
    }
}

/// Destination for pass counters. Implementations must tolerate concurrent
/// increments from item tasks.
pub trait MetricsSink: Send + Sync {
    fn incr(&self, counter: Counter);
}

/// Failures building or exposing the counter registry.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("metrics exposition is not UTF-8: {0}")]
    Encoding(#[from] FromUtf8Error),
}

/// In-process counters backed by a Prometheus registry.
pub struct Counters {
    registry: Registry,
    values: Vec<IntCounter>,
}

impl Counters {
    /// Register one counter per [`Counter`] in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut values = Vec::with_capacity(COUNTER_COUNT);
        for counter in Counter::ALL {
            let value = IntCounter::new(counter.name(), counter.help())?;
            registry.register(Box::new(value.clone()))?;
            values.push(value);
        }
        Ok(Self { registry, values })
    }

    /// Registry holding every counter, for embedding in a larger exporter.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()].get()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            job_count: self.get(Counter::JobCount),
            job_error: self.get(Counter::JobError),
            source_error: self.get(Counter::SourceError),
            store_error: self.get(Counter::StoreError),
            snapshot_error: self.get(Counter::SnapshotError),
            upload_success: self.get(Counter::UploadSuccess),
            upload_error: self.get(Counter::UploadError),
            delete_success: self.get(Counter::DeleteSuccess),
            delete_error: self.get(Counter::DeleteError),
        }
    }

    /// Prometheus text exposition of every counter.
    pub fn render_prometheus(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl fmt::Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counters")
            .field("values", &self.snapshot())
            .finish()
    }
}

impl MetricsSink for Counters {
    fn incr(&self, counter: Counter) {
        self.values[counter.index()].inc();
    }
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub job_count: u64,
    pub job_error: u64,
    pub source_error: u64,
    pub store_error: u64,
    pub snapshot_error: u64,
    pub upload_success: u64,
    pub upload_error: u64,
    pub delete_success: u64,
    pub delete_error: u64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn increments_are_per_counter() {
        let counters = Counters::new().expect("counters");
        counters.incr(Counter::UploadSuccess);
        counters.incr(Counter::UploadSuccess);
        counters.incr(Counter::DeleteError);

        let snap = counters.snapshot();
        assert_eq!(snap.upload_success, 2);
        assert_eq!(snap.delete_error, 1);
        assert_eq!(snap.job_count, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counters = Arc::new(Counters::new().expect("counters"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        counters.incr(Counter::JobCount);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(counters.get(Counter::JobCount), 8_000);
    }

    #[test]
    fn prometheus_text_lists_every_counter() {
        let counters = Counters::new().expect("counters");
        counters.incr(Counter::SourceError);
        let text = counters.render_prometheus().expect("render");

        for counter in Counter::ALL {
            assert!(text.contains(&format!("# TYPE {} counter", counter.name())));
            assert!(text.contains(&format!("# HELP {} {}", counter.name(), counter.help())));
        }
        assert!(text.contains("relm_source_error_total 1\n"));
        assert!(text.contains("relm_upload_error_total 0\n"));
    }

    #[test]
    fn registry_gathers_one_family_per_counter() {
        let counters = Counters::new().expect("counters");
        counters.incr(Counter::UploadSuccess);

        let families = counters.registry().gather();
        assert_eq!(families.len(), Counter::ALL.len());
        let upload = families
            .iter()
            .find(|family| family.get_name() == "relm_upload_success_total")
            .expect("upload family");
        assert_eq!(upload.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn registries_are_independent() {
        let a = Counters::new().expect("counters");
        let b = Counters::new().expect("counters");
        a.incr(Counter::JobCount);
        assert_eq!(a.get(Counter::JobCount), 1);
        assert_eq!(b.get(Counter::JobCount), 0);
    }
}
