//! Remote and gate error types.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by the transport for a single remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or service failure worth retrying.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote asked us to wait before calling again.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// The media object no longer exists remotely.
    #[error("media not found: {0}")]
    MediaNotFound(String),
}

/// Terminal outcome of a gated call.
///
/// Flood-waits never surface here: the gate absorbs them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Transient failures exhausted the retry budget.
    #[error("remote unavailable after {attempts} attempts: {reason}")]
    RemoteUnavailable { attempts: u32, reason: String },

    #[error("media not found: {0}")]
    MediaNotFound(String),

    /// The transport answered a request with the wrong response kind.
    #[error("unexpected response: expected {0}")]
    UnexpectedResponse(&'static str),
}

impl GateError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable { .. })
    }
}

/// Result type alias using GateError.
pub type GateResult<T> = Result<T, GateError>;
