//! Dry-run output.
//!
//! The reporter only ever sees a [`ReleaseSource`]; it has no handle on a
//! store and so cannot mutate one.

use std::io::{self, Write};
use std::sync::Arc;

use relm_core::Scope;

use crate::error::{PassError, SourceError};
use crate::reconciler::current_releases;
use crate::source::ReleaseSource;

/// Prints the live release set instead of exporting it.
#[derive(Clone)]
pub struct DryRunReporter {
    source: Arc<dyn ReleaseSource>,
    scope: Scope,
    verbose: bool,
}

impl DryRunReporter {
    pub fn new(source: Arc<dyn ReleaseSource>, verbose: bool) -> Self {
        Self {
            source,
            scope: Scope::All,
            verbose,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// One line per live release in scope.
    pub async fn render(&self) -> Result<Vec<String>, SourceError> {
        let releases = current_releases(self.source.as_ref(), &self.scope).await?;
        Ok(releases
            .iter()
            .map(|release| release.describe(self.verbose))
            .collect())
    }

    /// Render and print to stdout. Returns the number of releases printed.
    pub async fn report(&self) -> Result<usize, PassError> {
        let lines = self.render().await?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        write_lines(&mut out, &lines).map_err(PassError::Output)?;
        Ok(lines.len())
    }
}

pub fn write_lines<W: Write>(out: &mut W, lines: &[String]) -> io::Result<()> {
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()
}
