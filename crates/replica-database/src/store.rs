//! Transactional store API used by the sync engine.
//!
//! Each method is exactly one SQLite transaction on the executor thread.

use crate::executor::AsyncDatabase;
use crate::{
    queries, DatabaseError, DatabaseResult, MediaBlob, MediaReference, MessageId, MessageRecord,
    PageApplied, SourceId, SyncCursor, UpsertOutcome,
};
use std::path::Path;
use tracing::debug;

/// Durable owner of messages, media blob markers, and sync cursors.
#[derive(Clone)]
pub struct LocalStore {
    db: AsyncDatabase,
}

impl LocalStore {
    /// Open (or create) the replica database file.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        Ok(Self {
            db: AsyncDatabase::open(path).await?,
        })
    }

    /// Private in-memory store for tests.
    pub async fn in_memory() -> DatabaseResult<Self> {
        Ok(Self {
            db: AsyncDatabase::open_in_memory().await?,
        })
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    /// Insert or replace messages by (source, id).
    pub async fn upsert_messages(&self, batch: Vec<MessageRecord>) -> DatabaseResult<UpsertOutcome> {
        if batch.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        self.db
            .transaction(move |tx| queries::upsert_messages(tx, &batch))
            .await
    }

    /// Store a history page and move the cursor in the same transaction.
    ///
    /// `oldest_fetched` drops to the page minimum and `newest_known` rises to
    /// the page maximum. `history_top` rises to `covered_top` when given.
    pub async fn apply_history_page(
        &self,
        source: &SourceId,
        records: Vec<MessageRecord>,
        covered_top: Option<MessageId>,
    ) -> DatabaseResult<PageApplied> {
        if let Some(stray) = records.iter().find(|r| &r.source != source) {
            return Err(DatabaseError::InvalidData(format!(
                "history page for {source} contains message {} from {}",
                stray.id, stray.source
            )));
        }

        let source = source.clone();
        self.db
            .transaction(move |tx| {
                let upserted = queries::upsert_messages(tx, &records)?;

                let min = records.iter().map(|r| r.id).min();
                let max = records.iter().map(|r| r.id).max();

                let oldest_moved = match min {
                    Some(min) => queries::lower_oldest_fetched(tx, &source, min)?,
                    None => false,
                };
                let newest_moved = match max {
                    Some(max) => queries::raise_newest_known(tx, &source, max)?,
                    None => false,
                };
                if let Some(top) = covered_top {
                    queries::raise_history_top(tx, &source, top)?;
                }

                debug!(
                    source = %source,
                    records = records.len(),
                    oldest_moved,
                    newest_moved,
                    "History page committed"
                );

                Ok(PageApplied {
                    upserted,
                    oldest_moved,
                    newest_moved,
                })
            })
            .await
    }

    /// Merge one live update and raise `newest_known`.
    pub async fn apply_live_update(&self, record: MessageRecord) -> DatabaseResult<UpsertOutcome> {
        self.db
            .transaction(move |tx| {
                let outcome = queries::upsert_messages(tx, std::slice::from_ref(&record))?;
                queries::raise_newest_known(tx, &record.source, record.id)?;
                Ok(outcome)
            })
            .await
    }

    /// Cursor for a source; an empty cursor when nothing is stored yet.
    pub async fn get_cursor(&self, source: &SourceId) -> DatabaseResult<SyncCursor> {
        let source = source.clone();
        self.db
            .call(move |conn| {
                Ok(queries::get_cursor(conn, &source)?.unwrap_or_else(|| SyncCursor::empty(source)))
            })
            .await
    }

    pub async fn list_cursors(&self) -> DatabaseResult<Vec<SyncCursor>> {
        self.db.call(queries::list_cursors).await
    }

    /// Lower `oldest_fetched`. Returns whether the cursor moved.
    pub async fn advance_cursor_older(&self, source: &SourceId, id: MessageId) -> DatabaseResult<bool> {
        let source = source.clone();
        self.db
            .transaction(move |tx| queries::lower_oldest_fetched(tx, &source, id))
            .await
    }

    /// Raise `newest_known`. Returns whether the cursor moved.
    pub async fn advance_cursor_newer(&self, source: &SourceId, id: MessageId) -> DatabaseResult<bool> {
        let source = source.clone();
        self.db
            .transaction(move |tx| queries::raise_newest_known(tx, &source, id))
            .await
    }

    pub async fn mark_backfill_complete(&self, source: &SourceId) -> DatabaseResult<bool> {
        let source = source.clone();
        self.db
            .transaction(move |tx| queries::set_backfill_complete(tx, &source))
            .await
    }

    /// Distinct media references without a complete or failed blob.
    pub async fn list_pending_media(&self, max_count: usize) -> DatabaseResult<Vec<MediaReference>> {
        self.db
            .call(move |conn| queries::list_pending_media(conn, max_count))
            .await
    }

    /// Mark a download as started. The returned blob shows the status after
    /// the call; a `Complete` status means there is nothing to do.
    pub async fn begin_media_download(
        &self,
        reference: &MediaReference,
        relative_path: &str,
    ) -> DatabaseResult<MediaBlob> {
        let reference = reference.clone();
        let relative_path = relative_path.to_string();
        self.db
            .transaction(move |tx| queries::begin_media_download(tx, &reference, &relative_path))
            .await
    }

    /// Record a verified download. Idempotent.
    pub async fn record_media_complete(
        &self,
        reference: &MediaReference,
        relative_path: &str,
        bytes: u64,
    ) -> DatabaseResult<bool> {
        let reference = reference.clone();
        let relative_path = relative_path.to_string();
        self.db
            .transaction(move |tx| {
                queries::mark_media_complete(tx, &reference, &relative_path, bytes)
            })
            .await
    }

    /// Keep the latest transient error on a partial blob.
    pub async fn note_media_error(&self, reference: &MediaReference, reason: &str) -> DatabaseResult<()> {
        let key = reference.key();
        let reason = reason.to_string();
        self.db
            .transaction(move |tx| queries::note_media_error(tx, &key, &reason))
            .await
    }

    /// Permanently exclude a reference from the pending queue.
    pub async fn record_media_failure(
        &self,
        reference: &MediaReference,
        reason: &str,
    ) -> DatabaseResult<bool> {
        let reference = reference.clone();
        let reason = reason.to_string();
        self.db
            .transaction(move |tx| queries::mark_media_failed(tx, &reference, &reason))
            .await
    }

    pub async fn get_media_blob(&self, key: &str) -> DatabaseResult<Option<MediaBlob>> {
        let key = key.to_string();
        self.db
            .call(move |conn| queries::get_media_blob(conn, &key))
            .await
    }

    pub async fn get_message(
        &self,
        source: &SourceId,
        id: MessageId,
    ) -> DatabaseResult<Option<MessageRecord>> {
        let source = source.clone();
        self.db
            .call(move |conn| queries::get_message(conn, &source, id))
            .await
    }

    pub async fn list_messages(&self, source: &SourceId) -> DatabaseResult<Vec<MessageRecord>> {
        let source = source.clone();
        self.db
            .call(move |conn| queries::list_messages(conn, &source))
            .await
    }

    /// Stored message count for one source, or all sources with `None`.
    pub async fn count_messages(&self, source: Option<&SourceId>) -> DatabaseResult<u64> {
        let source = source.cloned();
        self.db
            .call(move |conn| queries::count_messages(conn, source.as_ref()))
            .await
    }
}
