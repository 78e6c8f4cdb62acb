//! The capability the engine needs from a remote client.

use crate::RemoteError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use replica_database::{MediaReference, MessageId, MessageRecord, SourceId};
use std::fmt;

/// Page size most remotes accept at most.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// Body of a media download, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, RemoteError>>;

/// Live message events (new, edited, or deleted), in delivery order.
pub type UpdateStream = BoxStream<'static, Result<MessageRecord, RemoteError>>;

/// Messages strictly older than the requested id, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub records: Vec<MessageRecord>,
    /// The remote has older messages beyond this page.
    pub has_more: bool,
}

/// An opened media download.
pub struct MediaDownload {
    /// Size the remote reports for this object; 0 when unknown.
    pub declared_size: u64,
    pub chunks: ChunkStream,
}

impl fmt::Debug for MediaDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDownload")
            .field("declared_size", &self.declared_size)
            .finish_non_exhaustive()
    }
}

/// Remote messaging client as seen by the engine.
///
/// Implementations map their own failures onto [`RemoteError`]; the gate
/// decides what to retry.
#[async_trait]
pub trait RemoteTransport: Send + Sync + 'static {
    /// Fetch up to `limit` messages older than `before` (from the newest when `None`).
    async fn fetch_history_page(
        &self,
        source: &SourceId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<HistoryPage, RemoteError>;

    async fn fetch_media(&self, reference: &MediaReference) -> Result<MediaDownload, RemoteError>;

    /// Open the live update subscription.
    async fn subscribe_updates(&self) -> Result<UpdateStream, RemoteError>;

    /// Conversations available for backup.
    async fn list_sources(&self) -> Result<Vec<SourceId>, RemoteError> {
        Ok(Vec::new())
    }

    fn max_page_size(&self) -> usize {
        DEFAULT_MAX_PAGE_SIZE
    }
}
