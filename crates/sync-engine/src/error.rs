//! Engine error types.

use replica_database::{DatabaseError, SourceId};
use request_gate::GateError;
use thiserror::Error;

/// Errors surfaced by the backfiller, media fetcher, merger, and coordinator.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store failed. Always fatal for the run.
    #[error("local store failure: {0}")]
    Store(#[from] DatabaseError),

    /// Transient remote failures exhausted the gate's retry budget.
    #[error("remote unavailable after {attempts} attempts: {reason}")]
    RemoteUnavailable { attempts: u32, reason: String },

    /// The remote returned a page that would stall or corrupt backfill.
    #[error("remote anomaly in {source_id}: {detail}")]
    RemoteAnomaly { source_id: SourceId, detail: String },

    #[error("media not found: {0}")]
    MediaNotFound(String),

    #[error("unexpected remote response: expected {0}")]
    UnexpectedResponse(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Only local-store failures abort a run; everything else is scoped to
    /// one source or one media object.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<GateError> for SyncError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::RemoteUnavailable { attempts, reason } => {
                Self::RemoteUnavailable { attempts, reason }
            }
            GateError::MediaNotFound(id) => Self::MediaNotFound(id),
            GateError::UnexpectedResponse(what) => Self::UnexpectedResponse(what),
        }
    }
}

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;
