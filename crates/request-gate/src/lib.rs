//! Rate-limited gate in front of the remote messaging service.
//!
//! Every history page, media download and update subscription goes through
//! one [`RequestGate`]. It spaces calls out, honours flood-wait instructions
//! from the remote, and retries transient failures with exponential backoff.
//! Callers only ever see a response or a terminal [`GateError`].

mod config;
mod error;
mod gate;
mod transport;

pub use config::GateConfig;
pub use error::{GateError, GateResult, RemoteError};
pub use gate::{GateStats, RemoteRequest, RemoteResponse, RequestGate, MAX_FLOOD_WAIT};
pub use transport::{
    ChunkStream, HistoryPage, MediaDownload, RemoteTransport, UpdateStream, DEFAULT_MAX_PAGE_SIZE,
};
