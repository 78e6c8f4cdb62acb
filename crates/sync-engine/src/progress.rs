//! Progress callbacks for long-running syncs.

use crate::report::{MediaOutcome, SourceReport};
use replica_database::{MediaReference, MessageId, MessageRecord, SourceId};
use tracing::{debug, info};

/// Observer for sync progress. Every callback defaults to a no-op.
///
/// Callbacks run inline on engine tasks and must not block.
pub trait SyncProgress: Send + Sync {
    /// A history page was stored for `source`; `oldest` is its smallest id.
    fn on_backfill_page(&self, _source: &SourceId, _records: usize, _oldest: MessageId) {}

    fn on_source_finished(&self, _report: &SourceReport) {}

    fn on_media_finished(&self, _reference: &MediaReference, _outcome: MediaOutcome) {}

    fn on_live_applied(&self, _record: &MessageRecord) {}
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl SyncProgress for NoProgress {}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl SyncProgress for TracingProgress {
    fn on_backfill_page(&self, source: &SourceId, records: usize, oldest: MessageId) {
        debug!(source = %source, records, oldest = %oldest, "Backfill page stored");
    }

    fn on_source_finished(&self, report: &SourceReport) {
        info!(
            source = %report.source,
            status = report.status.label(),
            pages = report.pages,
            records = report.records,
            "Source backfill finished"
        );
    }

    fn on_media_finished(&self, reference: &MediaReference, outcome: MediaOutcome) {
        debug!(media_key = %reference.key(), outcome = ?outcome, "Media processed");
    }

    fn on_live_applied(&self, record: &MessageRecord) {
        debug!(source = %record.source, id = %record.id, state = record.state.as_str(), "Live update merged");
    }
}
