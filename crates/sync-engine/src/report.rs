//! Run summaries.

use replica_database::SourceId;
use request_gate::GateStats;
use std::fmt;

/// Why backfill of one source stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillStop {
    /// The remote has nothing older. Recorded in the cursor.
    Exhausted,
    /// The run's message budget ran out.
    LimitReached,
    /// An earlier run already exhausted the history.
    AlreadyComplete,
}

/// What one backfill call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub source: SourceId,
    pub pages: usize,
    pub records: usize,
    pub stop: BackfillStop,
}

/// Final status of a source in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Finished(BackfillStop),
    Failed(String),
}

impl SourceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Finished(BackfillStop::Exhausted) => "exhausted",
            Self::Finished(BackfillStop::LimitReached) => "limit_reached",
            Self::Finished(BackfillStop::AlreadyComplete) => "already_complete",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: SourceId,
    pub status: SourceStatus,
    pub pages: usize,
    pub records: usize,
}

impl From<BackfillOutcome> for SourceReport {
    fn from(outcome: BackfillOutcome) -> Self {
        Self {
            source: outcome.source,
            status: SourceStatus::Finished(outcome.stop),
            pages: outcome.pages,
            records: outcome.records,
        }
    }
}

/// Result of processing one pending media reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOutcome {
    Downloaded { bytes: u64 },
    /// Another pass finished it first.
    AlreadyComplete,
    /// Permanently failed; never retried.
    Failed,
    /// Left partial for a later pass.
    Deferred,
}

/// Totals for one or more media passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaSummary {
    pub downloaded: usize,
    pub bytes: u64,
    pub failed: usize,
    /// Keys left partial at the end of the pass.
    pub deferred: usize,
}

impl MediaSummary {
    pub fn merge(&mut self, other: MediaSummary) {
        self.downloaded += other.downloaded;
        self.bytes += other.bytes;
        self.failed += other.failed;
        self.deferred = other.deferred;
    }
}

/// Live merger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub applied: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Resubscriptions after the update stream failed or ended.
    pub restarts: u64,
}

/// Everything a coordinator run did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
    /// Set when `list_sources` failed and the run fell back to the sources
    /// already in the store.
    pub discovery_error: Option<String>,
    pub media: MediaSummary,
    /// Present in daemon mode.
    pub live: Option<MergeStats>,
    pub gate: GateStats,
}

impl SyncReport {
    pub fn source(&self, source: &SourceId) -> Option<&SourceReport> {
        self.sources.iter().find(|r| &r.source == source)
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|r| r.status.is_failed())
    }

    pub fn total_records(&self) -> usize {
        self.sources.iter().map(|r| r.records).sum()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed_sources().count();
        write!(
            f,
            "{} sources ({} failed), {} records, {} media downloaded ({} bytes), {} media failed",
            self.sources.len(),
            failed,
            self.total_records(),
            self.media.downloaded,
            self.media.bytes,
            self.media.failed
        )?;
        if let Some(reason) = &self.discovery_error {
            write!(f, ", discovery failed: {reason}")?;
        }
        Ok(())
    }
}
