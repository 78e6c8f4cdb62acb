//! Database migrations.
//!
//! This module contains all SQL migrations for the replica schema.
//! Migrations are run in order and tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema v{current_version} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_messages_and_cursors(conn)?;
    }
    if current_version < 2 {
        migrate_v2_media_blobs(conn)?;
    }
    if current_version < 3 {
        migrate_v3_history_top(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Messages keyed by (source, message_id) and per-source sync cursors.
fn migrate_v1_messages_and_cursors(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: messages and sync cursors");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            source TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            sender TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            body TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'original',
            media_key TEXT,
            media_id TEXT,
            media_kind TEXT,
            media_size INTEGER,
            media_version TEXT,
            inserted_at TEXT NOT NULL,
            PRIMARY KEY (source, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_media_key
            ON messages(media_key) WHERE media_key IS NOT NULL;

        CREATE TABLE IF NOT EXISTS sync_cursors (
            source TEXT PRIMARY KEY,
            oldest_fetched INTEGER,
            newest_known INTEGER,
            backfill_complete INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    record_migration(conn, 1, "messages_and_cursors")?;
    Ok(())
}

/// V2: Media blob completion markers.
fn migrate_v2_media_blobs(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: media blobs");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS media_blobs (
            key TEXT PRIMARY KEY,
            relative_path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'partial',
            bytes_written INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            failure_reason TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_media_blobs_status
            ON media_blobs(status);
        ",
    )?;

    record_migration(conn, 2, "media_blobs")?;
    Ok(())
}

/// V3: Track the newest id covered by contiguous backfill.
///
/// Existing cursors start at their newest known id, which was the top of
/// the only window earlier versions fetched.
fn migrate_v3_history_top(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: history top");

    let has_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('sync_cursors') WHERE name = 'history_top'")?
        .exists([])?;

    if !has_column {
        conn.execute_batch(
            "
            ALTER TABLE sync_cursors ADD COLUMN history_top INTEGER;
            UPDATE sync_cursors SET history_top = newest_known WHERE oldest_fetched IS NOT NULL;
            ",
        )?;
    }

    record_migration(conn, 3, "history_top")?;
    Ok(())
}
