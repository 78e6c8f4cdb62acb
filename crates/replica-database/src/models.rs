//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote conversation identifier (a chat, channel, or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Message identifier, strictly increasing in send order within a source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a message as last reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    #[default]
    Original,
    Edited,
    Deleted,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Edited => "edited",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edited" => Self::Edited,
            "deleted" => Self::Deleted,
            _ => Self::Original,
        }
    }
}

/// Kind of remote media object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Document,
    Voice,
    Video,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "photo" => Self::Photo,
            "document" => Self::Document,
            "voice" => Self::Voice,
            "video" => Self::Video,
            _ => Self::Other,
        }
    }

    /// File extension used for stored blobs of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Photo => ".jpg",
            Self::Voice => ".ogg",
            Self::Video => ".mp4",
            Self::Document | Self::Other => "",
        }
    }
}

/// Reference from a message to a remote media object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    /// Stable remote id of the object.
    pub id: String,
    pub kind: MediaKind,
    /// Size in bytes the remote advertises; 0 when unknown.
    pub declared_size: u64,
    /// Content hash or version token when the remote provides one.
    pub version: Option<String>,
}

impl MediaReference {
    /// Identity of the blob this reference points at.
    ///
    /// Two references with the same id but different versions are distinct
    /// blobs and are each downloaded once. `%` and `@` in the id are
    /// percent-escaped, so the first `@` always separates the version.
    pub fn key(&self) -> String {
        let id = self.id.replace('%', "%25").replace('@', "%40");
        match &self.version {
            Some(version) => format!("{id}@{version}"),
            None => id,
        }
    }
}

/// One message in the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub source: SourceId,
    pub id: MessageId,
    pub sender: String,
    pub sent_at: DateTime<Utc>,
    pub body: String,
    pub media: Option<MediaReference>,
    pub state: MessageState,
    /// Set by the store on every write; the value supplied by callers is ignored.
    pub inserted_at: DateTime<Utc>,
}

/// Completion state of a media blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    /// Download started but not verified; retried on a later pass.
    Partial,
    /// Bytes on disk match the declared size.
    Complete,
    /// Permanently given up on.
    Failed,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            _ => Self::Partial,
        }
    }
}

/// Local record of a downloaded (or downloading) media object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBlob {
    pub key: String,
    /// Path relative to the replica base directory.
    pub relative_path: String,
    pub status: MediaStatus,
    pub bytes_written: u64,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Per-source backfill progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub source: SourceId,
    /// Smallest message id fetched by backfill. Only decreases.
    pub oldest_fetched: Option<MessageId>,
    /// Largest message id seen from any path. Only increases.
    pub newest_known: Option<MessageId>,
    /// Largest id below which backfill has no gaps. Only increases.
    pub history_top: Option<MessageId>,
    /// The remote reported nothing older than `oldest_fetched`.
    pub backfill_complete: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncCursor {
    /// Cursor for a source nothing has been stored for yet.
    pub fn empty(source: SourceId) -> Self {
        Self {
            source,
            oldest_fetched: None,
            newest_known: None,
            history_top: None,
            backfill_complete: false,
            updated_at: None,
        }
    }

    /// Backfill has fetched at least one page for this source.
    pub fn is_started(&self) -> bool {
        self.oldest_fetched.is_some()
    }
}

/// Result of upserting a batch of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: UpsertOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Result of applying one history page atomically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageApplied {
    pub upserted: UpsertOutcome,
    pub oldest_moved: bool,
    pub newest_moved: bool,
}
