//! Database error types.

use thiserror::Error;

/// Local-store failure. The engine treats every variant as fatal for the run.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The executor thread is gone or the file could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unknown or newer schema version.
    #[error("Migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller handed the store records it refuses to write.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
