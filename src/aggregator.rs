//! Per-source fetch → persist → advance orchestration.
//!
//! An [`Aggregator`] owns one query, a list of sources, a checkpoint store,
//! and a writer. A run processes the sources one at a time, in configured
//! order:
//!
//! ```text
//! get_watermark ──▶ fetch_entries(query, watermark) ──▶ write each entry
//!                                                         │
//!                           set_watermark(max date) ◀─────┘ (stream exhausted)
//! ```
//!
//! The watermark is only advanced after every entry of the pass has been
//! written. A pass that fails or is interrupted leaves the watermark where
//! it was; the next run refetches those entries and the writer skips the ones
//! already on disk.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{PassError, RunError};
use crate::models::Query;
use crate::traits::EntrySource;
use crate::writer::{storage_key, EntryWriter, WriteOutcome};

/// Knobs for a single run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore stored watermarks and fetch all available history.
    pub full: bool,
    /// Fetch and count, but neither write entries nor advance watermarks.
    pub dry_run: bool,
}

/// Counters for one successful source pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Entries received from the source.
    pub fetched: u64,
    /// New records written (in a dry run: records that would be written).
    pub written: u64,
    /// Entries whose record already existed.
    pub duplicates: u64,
    /// Watermark before the pass.
    pub previous: Option<DateTime<Utc>>,
    /// Watermark after the pass.
    pub watermark: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct PassReport {
    pub source_id: String,
    pub outcome: Result<PassStats, PassError>,
}

#[derive(Debug)]
pub struct RunReport {
    pub aggregator: String,
    pub passes: Vec<PassReport>,
    /// Set when the run stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &PassError)> {
        self.passes
            .iter()
            .filter_map(|p| p.outcome.as_ref().err().map(|e| (p.source_id.as_str(), e)))
    }

    /// The run is fatal only when every attempted pass failed.
    pub fn check(&self) -> Result<(), RunError> {
        let failed = self.failures().count();
        if failed > 0 && failed == self.passes.len() {
            return Err(RunError::AllSourcesFailed {
                aggregator: self.aggregator.clone(),
                failed,
            });
        }
        Ok(())
    }
}

pub struct Aggregator {
    name: String,
    sources: Vec<Arc<dyn EntrySource>>,
    query: Query,
    checkpoints: Box<dyn CheckpointStore>,
    writer: Box<dyn EntryWriter>,
}

impl Aggregator {
    pub fn new(
        name: impl Into<String>,
        sources: Vec<Arc<dyn EntrySource>>,
        query: Query,
        checkpoints: Box<dyn CheckpointStore>,
        writer: Box<dyn EntryWriter>,
    ) -> Self {
        Self {
            name: name.into(),
            sources,
            query,
            checkpoints,
            writer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn sources(&self) -> &[Arc<dyn EntrySource>] {
        &self.sources
    }

    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    /// Run every source once with default options.
    pub async fn run(&self) -> RunReport {
        self.run_with(RunOptions::default(), &AtomicBool::new(false))
            .await
    }

    /// Run every source once. `cancel` is checked before each source; a
    /// source already in progress finishes its pass.
    pub async fn run_with(&self, options: RunOptions, cancel: &AtomicBool) -> RunReport {
        let mut report = RunReport {
            aggregator: self.name.clone(),
            passes: Vec::with_capacity(self.sources.len()),
            cancelled: false,
        };

        for source in &self.sources {
            if cancel.load(Ordering::SeqCst) {
                warn!(aggregator = %self.name, "run cancelled, skipping remaining sources");
                report.cancelled = true;
                break;
            }

            let source_id = source.source_id();
            info!(aggregator = %self.name, source = %source_id, "pass started");
            let outcome = self.run_pass(source.as_ref(), &source_id, options).await;

            match &outcome {
                Ok(stats) => info!(
                    aggregator = %self.name,
                    source = %source_id,
                    fetched = stats.fetched,
                    written = stats.written,
                    duplicates = stats.duplicates,
                    "pass finished"
                ),
                Err(e) => error!(
                    aggregator = %self.name,
                    source = %source_id,
                    kind = e.kind(),
                    error = %e,
                    "pass failed"
                ),
            }

            report.passes.push(PassReport { source_id, outcome });
        }

        report
    }

    async fn run_pass(
        &self,
        source: &dyn EntrySource,
        source_id: &str,
        options: RunOptions,
    ) -> Result<PassStats, PassError> {
        let previous = self
            .checkpoints
            .get_watermark(source_id)
            .await
            .map_err(PassError::CheckpointRead)?;
        let from = if options.full { None } else { previous };

        let mut stats = PassStats {
            previous,
            watermark: previous,
            ..PassStats::default()
        };
        let mut max_seen: Option<DateTime<Utc>> = None;
        // Dry runs write nothing, so repeats within the pass are caught here.
        let mut planned: HashSet<String> = HashSet::new();

        let mut entries = source.fetch_entries(&self.query, from);
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            stats.fetched += 1;

            let is_new = if options.dry_run {
                planned.insert(storage_key(&entry)) && !self.writer.contains(&entry).await?
            } else {
                matches!(self.writer.write(&entry).await?, WriteOutcome::Written(_))
            };
            if is_new {
                stats.written += 1;
            } else {
                stats.duplicates += 1;
            }

            if max_seen.map_or(true, |m| entry.date > m) {
                max_seen = Some(entry.date);
            }
        }
        drop(entries);

        if let Some(max) = max_seen {
            if !options.dry_run {
                self.checkpoints
                    .set_watermark(source_id, max)
                    .await
                    .map_err(PassError::CheckpointCommit)?;
            }
            stats.watermark = stats.watermark.max(Some(max));
        }

        Ok(stats)
    }
}
