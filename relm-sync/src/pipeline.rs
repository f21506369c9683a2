//! Shared pass entrypoint used by the CLI and the daemon runner.

use std::sync::Arc;

use relm_core::{ExportConfig, Scope, Strategy};

use crate::error::PassError;
use crate::metrics::MetricsSink;
use crate::reconciler::Reconciler;
use crate::report::PassReport;
use crate::reporter::DryRunReporter;
use crate::source::ReleaseSource;
use crate::store::StateStore;

/// What a pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Dry run: this many releases were printed.
    Reported { releases: usize },
    /// Export: the reconciliation report.
    Exported(PassReport),
}

/// A configured pass, either dry-run or export.
#[derive(Clone)]
pub struct Pipeline {
    strategy: Strategy,
    reconciler: Reconciler,
    reporter: DryRunReporter,
}

impl Pipeline {
    pub fn new(
        config: &ExportConfig,
        source: Arc<dyn ReleaseSource>,
        store: Arc<dyn StateStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let verbose = matches!(config.strategy, Strategy::DryRun { verbose: true });
        let reconciler = Reconciler::new(source.clone(), store, metrics)
            .with_scope(config.scope.clone())
            .with_max_concurrency(config.max_concurrency)
            .with_pass_timeout(config.pass_timeout);
        let reporter = DryRunReporter::new(source, verbose).with_scope(config.scope.clone());
        Self {
            strategy: config.strategy,
            reconciler,
            reporter,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn scope(&self) -> &Scope {
        self.reconciler.scope()
    }

    /// Run one pass with the configured strategy.
    pub async fn run(&self) -> Result<PassOutcome, PassError> {
        match self.strategy {
            Strategy::DryRun { .. } => {
                let releases = self.reporter.report().await?;
                Ok(PassOutcome::Reported { releases })
            }
            Strategy::Export => Ok(PassOutcome::Exported(self.reconciler.run_pass().await?)),
        }
    }
}
