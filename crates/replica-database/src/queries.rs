//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter, so it runs
//! equally on a plain connection or inside a `Transaction`. Cursor movement
//! is monotonic in SQL: callers may pass any id and the row only changes
//! when the new value extends the range.

use crate::{
    DatabaseError, DatabaseResult, MediaBlob, MediaKind, MediaReference, MediaStatus, MessageId,
    MessageRecord, MessageState, SourceId, SyncCursor, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

// ==========================================
// Messages
// ==========================================

const MESSAGE_COLUMNS: &str = "source, message_id, sender, sent_at, body, state,
     media_id, media_kind, media_size, media_version, inserted_at";

/// Insert or replace one message. Returns `true` when the row is new.
///
/// A later record replaces the stored one, except that deletion is sticky:
/// once either side says `Deleted`, the stored content is kept and only the
/// state (and `inserted_at`) change.
pub fn upsert_message(
    conn: &Connection,
    record: &MessageRecord,
    now: &DateTime<Utc>,
) -> DatabaseResult<bool> {
    let now = now.to_rfc3339();
    let existing_state: Option<String> = conn
        .prepare_cached("SELECT state FROM messages WHERE source = ?1 AND message_id = ?2")?
        .query_row(params![record.source.as_str(), record.id.get()], |row| row.get(0))
        .optional()?;

    let media = record.media.as_ref();
    let media_key = media.map(MediaReference::key);
    let media_id = media.map(|m| m.id.as_str());
    let media_kind = media.map(|m| m.kind.as_str());
    let media_size = media.map(|m| m.declared_size as i64);
    let media_version = media.and_then(|m| m.version.as_deref());

    match existing_state.map(|s| MessageState::from_str(&s)) {
        None => {
            conn.prepare_cached(
                "INSERT INTO messages (source, message_id, sender, sent_at, body, state,
                     media_key, media_id, media_kind, media_size, media_version, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?
            .execute(params![
                record.source.as_str(),
                record.id.get(),
                record.sender,
                record.sent_at.to_rfc3339(),
                record.body,
                record.state.as_str(),
                media_key,
                media_id,
                media_kind,
                media_size,
                media_version,
                now,
            ])?;
            Ok(true)
        }
        Some(_) if record.state == MessageState::Deleted => {
            conn.prepare_cached(
                "UPDATE messages SET state = 'deleted', inserted_at = ?3
                 WHERE source = ?1 AND message_id = ?2",
            )?
            .execute(params![record.source.as_str(), record.id.get(), now])?;
            Ok(false)
        }
        Some(MessageState::Deleted) => {
            conn.prepare_cached(
                "UPDATE messages SET inserted_at = ?3 WHERE source = ?1 AND message_id = ?2",
            )?
            .execute(params![record.source.as_str(), record.id.get(), now])?;
            Ok(false)
        }
        Some(_) => {
            conn.prepare_cached(
                "UPDATE messages SET sender = ?3, sent_at = ?4, body = ?5, state = ?6,
                     media_key = ?7, media_id = ?8, media_kind = ?9, media_size = ?10,
                     media_version = ?11, inserted_at = ?12
                 WHERE source = ?1 AND message_id = ?2",
            )?
            .execute(params![
                record.source.as_str(),
                record.id.get(),
                record.sender,
                record.sent_at.to_rfc3339(),
                record.body,
                record.state.as_str(),
                media_key,
                media_id,
                media_kind,
                media_size,
                media_version,
                now,
            ])?;
            Ok(false)
        }
    }
}

/// Upsert a batch of messages, counting inserts and replacements.
pub fn upsert_messages(conn: &Connection, records: &[MessageRecord]) -> DatabaseResult<UpsertOutcome> {
    let now = Utc::now();
    let mut outcome = UpsertOutcome::default();
    for record in records {
        if upsert_message(conn, record, &now)? {
            outcome.inserted += 1;
        } else {
            outcome.updated += 1;
        }
    }
    debug!(inserted = outcome.inserted, updated = outcome.updated, "Upserted messages");
    Ok(outcome)
}

/// Get a message by its key.
pub fn get_message(
    conn: &Connection,
    source: &SourceId,
    id: MessageId,
) -> DatabaseResult<Option<MessageRecord>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE source = ?1 AND message_id = ?2"
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let result = stmt.query_row(params![source.as_str(), id.get()], map_message);

    match result {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List messages for a source ordered by id, oldest first.
pub fn list_messages(conn: &Connection, source: &SourceId) -> DatabaseResult<Vec<MessageRecord>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE source = ?1 ORDER BY message_id ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let messages = stmt
        .query_map(params![source.as_str()], map_message)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

/// Count stored messages, for one source or across all sources.
pub fn count_messages(conn: &Connection, source: Option<&SourceId>) -> DatabaseResult<u64> {
    let count: i64 = match source {
        Some(source) => conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE source = ?1",
            params![source.as_str()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?,
    };
    Ok(count as u64)
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let media_id: Option<String> = row.get(6)?;
    let media = match media_id {
        Some(id) => Some(MediaReference {
            id,
            kind: MediaKind::from_str(&row.get::<_, Option<String>>(7)?.unwrap_or_default()),
            declared_size: row.get::<_, Option<i64>>(8)?.unwrap_or(0).max(0) as u64,
            version: row.get(9)?,
        }),
        None => None,
    };

    Ok(MessageRecord {
        source: SourceId(row.get(0)?),
        id: MessageId(row.get(1)?),
        sender: row.get(2)?,
        sent_at: parse_datetime(row.get::<_, String>(3)?),
        body: row.get(4)?,
        state: MessageState::from_str(&row.get::<_, String>(5)?),
        media,
        inserted_at: parse_datetime(row.get::<_, String>(10)?),
    })
}

// ==========================================
// Sync cursors
// ==========================================

/// Get the cursor for a source, if one has been written.
pub fn get_cursor(conn: &Connection, source: &SourceId) -> DatabaseResult<Option<SyncCursor>> {
    let mut stmt = conn.prepare_cached(
        "SELECT source, oldest_fetched, newest_known, history_top, backfill_complete, updated_at
         FROM sync_cursors WHERE source = ?1",
    )?;

    let result = stmt.query_row(params![source.as_str()], map_cursor);

    match result {
        Ok(cursor) => Ok(Some(cursor)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List all cursors ordered by source.
pub fn list_cursors(conn: &Connection) -> DatabaseResult<Vec<SyncCursor>> {
    let mut stmt = conn.prepare_cached(
        "SELECT source, oldest_fetched, newest_known, history_top, backfill_complete, updated_at
         FROM sync_cursors ORDER BY source ASC",
    )?;

    let cursors = stmt
        .query_map([], map_cursor)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(cursors)
}

fn map_cursor(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncCursor> {
    Ok(SyncCursor {
        source: SourceId(row.get(0)?),
        oldest_fetched: row.get::<_, Option<i64>>(1)?.map(MessageId),
        newest_known: row.get::<_, Option<i64>>(2)?.map(MessageId),
        history_top: row.get::<_, Option<i64>>(3)?.map(MessageId),
        backfill_complete: row.get(4)?,
        updated_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
    })
}

/// Lower `oldest_fetched` to `id`. Returns `true` when the cursor moved.
pub fn lower_oldest_fetched(conn: &Connection, source: &SourceId, id: MessageId) -> DatabaseResult<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO sync_cursors (source, oldest_fetched, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET
                 oldest_fetched = excluded.oldest_fetched,
                 updated_at = excluded.updated_at
             WHERE sync_cursors.oldest_fetched IS NULL
                OR excluded.oldest_fetched < sync_cursors.oldest_fetched",
        )?
        .execute(params![source.as_str(), id.get(), Utc::now().to_rfc3339()])?;
    Ok(changed > 0)
}

/// Raise `newest_known` to `id`. Returns `true` when the cursor moved.
pub fn raise_newest_known(conn: &Connection, source: &SourceId, id: MessageId) -> DatabaseResult<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO sync_cursors (source, newest_known, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET
                 newest_known = excluded.newest_known,
                 updated_at = excluded.updated_at
             WHERE sync_cursors.newest_known IS NULL
                OR excluded.newest_known > sync_cursors.newest_known",
        )?
        .execute(params![source.as_str(), id.get(), Utc::now().to_rfc3339()])?;
    Ok(changed > 0)
}

/// Raise `history_top` to `id`. Returns `true` when the cursor moved.
pub fn raise_history_top(conn: &Connection, source: &SourceId, id: MessageId) -> DatabaseResult<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO sync_cursors (source, history_top, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET
                 history_top = excluded.history_top,
                 updated_at = excluded.updated_at
             WHERE sync_cursors.history_top IS NULL
                OR excluded.history_top > sync_cursors.history_top",
        )?
        .execute(params![source.as_str(), id.get(), Utc::now().to_rfc3339()])?;
    Ok(changed > 0)
}

/// Record that the remote has nothing older than `oldest_fetched`.
pub fn set_backfill_complete(conn: &Connection, source: &SourceId) -> DatabaseResult<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO sync_cursors (source, backfill_complete, updated_at) VALUES (?1, 1, ?2)
             ON CONFLICT(source) DO UPDATE SET
                 backfill_complete = 1,
                 updated_at = excluded.updated_at
             WHERE sync_cursors.backfill_complete = 0",
        )?
        .execute(params![source.as_str(), Utc::now().to_rfc3339()])?;
    Ok(changed > 0)
}

// ==========================================
// Media blobs
// ==========================================

/// Distinct media references that still need a download.
///
/// A reference is pending when a stored message points at it and it has no
/// blob, or its blob is `Partial`. Ordered by first appearance.
pub fn list_pending_media(conn: &Connection, limit: usize) -> DatabaseResult<Vec<MediaReference>> {
    let mut stmt = conn.prepare_cached(
        "SELECT MAX(m.media_id), MAX(m.media_kind), MAX(m.media_size), MAX(m.media_version)
         FROM messages m
         LEFT JOIN media_blobs b ON b.key = m.media_key
         WHERE m.media_key IS NOT NULL
           AND (b.key IS NULL OR b.status = 'partial')
         GROUP BY m.media_key
         ORDER BY MIN(m.rowid) ASC
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok(MediaReference {
                id: row.get(0)?,
                kind: MediaKind::from_str(&row.get::<_, Option<String>>(1)?.unwrap_or_default()),
                declared_size: row.get::<_, Option<i64>>(2)?.unwrap_or(0).max(0) as u64,
                version: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Get a media blob by key.
pub fn get_media_blob(conn: &Connection, key: &str) -> DatabaseResult<Option<MediaBlob>> {
    let mut stmt = conn.prepare_cached(
        "SELECT key, relative_path, status, bytes_written, attempts, failure_reason, updated_at
         FROM media_blobs WHERE key = ?1",
    )?;

    let result = stmt.query_row(params![key], |row| {
        Ok(MediaBlob {
            key: row.get(0)?,
            relative_path: row.get(1)?,
            status: MediaStatus::from_str(&row.get::<_, String>(2)?),
            bytes_written: row.get::<_, i64>(3)?.max(0) as u64,
            attempts: row.get::<_, i64>(4)?.max(0) as u32,
            failure_reason: row.get(5)?,
            updated_at: parse_datetime(row.get::<_, String>(6)?),
        })
    });

    match result {
        Ok(blob) => Ok(Some(blob)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Start (or restart) a download: the blob becomes `Partial` with zero
/// bytes and one more attempt. Complete and failed blobs are left alone.
pub fn begin_media_download(
    conn: &Connection,
    reference: &MediaReference,
    relative_path: &str,
) -> DatabaseResult<MediaBlob> {
    let key = reference.key();
    conn.prepare_cached(
        "INSERT INTO media_blobs (key, relative_path, status, bytes_written, attempts, failure_reason, updated_at)
         VALUES (?1, ?2, 'partial', 0, 1, NULL, ?3)
         ON CONFLICT(key) DO UPDATE SET
             relative_path = excluded.relative_path,
             bytes_written = 0,
             attempts = media_blobs.attempts + 1,
             updated_at = excluded.updated_at
         WHERE media_blobs.status = 'partial'",
    )?
    .execute(params![key, relative_path, Utc::now().to_rfc3339()])?;

    get_media_blob(conn, &key)?
        .ok_or_else(|| DatabaseError::InvalidData(format!("media blob {key} missing after upsert")))
}

/// Mark a blob complete. Returns `false` when it already was.
pub fn mark_media_complete(
    conn: &Connection,
    reference: &MediaReference,
    relative_path: &str,
    bytes: u64,
) -> DatabaseResult<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO media_blobs (key, relative_path, status, bytes_written, attempts, failure_reason, updated_at)
             VALUES (?1, ?2, 'complete', ?3, 1, NULL, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 relative_path = excluded.relative_path,
                 status = 'complete',
                 bytes_written = excluded.bytes_written,
                 failure_reason = NULL,
                 updated_at = excluded.updated_at
             WHERE media_blobs.status != 'complete'",
        )?
        .execute(params![
            reference.key(),
            relative_path,
            bytes as i64,
            Utc::now().to_rfc3339()
        ])?;
    Ok(changed > 0)
}

/// Keep the last error on a `Partial` blob without changing its status.
pub fn note_media_error(conn: &Connection, key: &str, reason: &str) -> DatabaseResult<()> {
    conn.prepare_cached(
        "UPDATE media_blobs SET failure_reason = ?2, updated_at = ?3
         WHERE key = ?1 AND status = 'partial'",
    )?
    .execute(params![key, reason, Utc::now().to_rfc3339()])?;
    Ok(())
}

/// Permanently give up on a blob. A complete blob is never downgraded.
pub fn mark_media_failed(
    conn: &Connection,
    reference: &MediaReference,
    reason: &str,
) -> DatabaseResult<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO media_blobs (key, relative_path, status, bytes_written, attempts, failure_reason, updated_at)
             VALUES (?1, '', 'failed', 0, 0, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 status = 'failed',
                 bytes_written = 0,
                 failure_reason = excluded.failure_reason,
                 updated_at = excluded.updated_at
             WHERE media_blobs.status != 'complete'",
        )?
        .execute(params![reference.key(), reason, Utc::now().to_rfc3339()])?;
    Ok(changed > 0)
}

// ==========================================
// Helpers
// ==========================================

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
