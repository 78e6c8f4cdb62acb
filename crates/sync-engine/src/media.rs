//! Media fetcher.
//!
//! Drains the pending media queue in batches. A blob is written to a
//! `.part` file, synced, size-checked, and renamed before the store marks it
//! complete, so a `Complete` blob always has a full file behind it and a
//! crash mid-download only leaves a partial that the next pass redoes.

use crate::progress::SyncProgress;
use crate::report::{MediaOutcome, MediaSummary};
use crate::{SyncError, SyncResult};
use futures_util::StreamExt;
use replica_database::{LocalStore, MediaReference, MediaStatus};
use request_gate::{ChunkStream, GateError, RemoteTransport, RequestGate};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Storage path of a blob, relative to the replica root:
/// `media/<kind>/<first two hex digits>/<sha256 of key><ext>`.
pub fn media_relative_path(reference: &MediaReference) -> String {
    let digest = Sha256::digest(reference.key().as_bytes());
    let mut hash = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(hash, "{byte:02x}");
    }
    format!(
        "media/{}/{}/{}{}",
        reference.kind.as_str(),
        &hash[..2],
        hash,
        reference.kind.extension()
    )
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

enum WriteFailure {
    Remote(String),
    Io(std::io::Error),
}

/// Downloads pending media through the gate.
pub struct MediaFetcher<T: RemoteTransport> {
    store: LocalStore,
    gate: Arc<RequestGate<T>>,
    root: PathBuf,
    batch_size: usize,
    max_attempts: u32,
    progress: Arc<dyn SyncProgress>,
}

impl<T: RemoteTransport> MediaFetcher<T> {
    pub fn new(
        store: LocalStore,
        gate: Arc<RequestGate<T>>,
        root: PathBuf,
        batch_size: usize,
        max_attempts: u32,
        progress: Arc<dyn SyncProgress>,
    ) -> Self {
        Self {
            store,
            gate,
            root,
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
            progress,
        }
    }

    /// Process pending media until every remaining key is done, failed, or
    /// deferred in this pass.
    pub async fn run_until_drained(&self) -> SyncResult<MediaSummary> {
        let mut summary = MediaSummary::default();
        let mut deferred: HashSet<String> = HashSet::new();

        loop {
            let batch: Vec<MediaReference> = self
                .store
                .list_pending_media(self.batch_size + deferred.len())
                .await?
                .into_iter()
                .filter(|r| !deferred.contains(&r.key()))
                .take(self.batch_size)
                .collect();

            if batch.is_empty() {
                break;
            }

            for reference in batch {
                let outcome = self.fetch_one(&reference).await?;
                match outcome {
                    MediaOutcome::Downloaded { bytes } => {
                        summary.downloaded += 1;
                        summary.bytes += bytes;
                    }
                    MediaOutcome::Failed => summary.failed += 1,
                    MediaOutcome::Deferred => {
                        deferred.insert(reference.key());
                    }
                    MediaOutcome::AlreadyComplete => {}
                }
                self.progress.on_media_finished(&reference, outcome);
            }
        }

        summary.deferred = deferred.len();
        if summary.downloaded > 0 || summary.failed > 0 || summary.deferred > 0 {
            info!(
                downloaded = summary.downloaded,
                bytes = summary.bytes,
                failed = summary.failed,
                deferred = summary.deferred,
                "Media pass drained"
            );
        }
        Ok(summary)
    }

    /// Download one reference. Only store failures are returned as errors.
    pub async fn fetch_one(&self, reference: &MediaReference) -> SyncResult<MediaOutcome> {
        let key = reference.key();
        let relative_path = media_relative_path(reference);

        let blob = self
            .store
            .begin_media_download(reference, &relative_path)
            .await?;
        match blob.status {
            MediaStatus::Complete => return Ok(MediaOutcome::AlreadyComplete),
            MediaStatus::Failed => return Ok(MediaOutcome::Failed),
            MediaStatus::Partial => {}
        }

        if blob.attempts > self.max_attempts {
            let reason = format!(
                "gave up after {} attempts: {}",
                blob.attempts - 1,
                blob.failure_reason.as_deref().unwrap_or("unknown error")
            );
            warn!(media_key = %key, attempts = blob.attempts - 1, "Media download abandoned");
            self.store.record_media_failure(reference, &reason).await?;
            return Ok(MediaOutcome::Failed);
        }

        let download = match self.gate.fetch_media(reference).await {
            Ok(download) => download,
            Err(GateError::MediaNotFound(id)) => {
                warn!(media_key = %key, "Media no longer exists remotely");
                self.store
                    .record_media_failure(reference, &format!("not found: {id}"))
                    .await?;
                return Ok(MediaOutcome::Failed);
            }
            Err(e) => {
                let e = SyncError::from(e);
                warn!(media_key = %key, error = %e, "Media download deferred");
                self.store.note_media_error(reference, &e.to_string()).await?;
                return Ok(MediaOutcome::Deferred);
            }
        };

        let expected = if reference.declared_size > 0 {
            reference.declared_size
        } else {
            download.declared_size
        };

        let final_path = self.root.join(&relative_path);
        let partial = part_path(&final_path);

        let written = match write_chunks(&partial, download.chunks).await {
            Ok(written) => written,
            Err(failure) => {
                remove_partial(&partial).await;
                let reason = match failure {
                    WriteFailure::Remote(reason) => reason,
                    WriteFailure::Io(e) => format!("write failed: {e}"),
                };
                warn!(media_key = %key, error = %reason, "Media download interrupted");
                self.store.note_media_error(reference, &reason).await?;
                return Ok(MediaOutcome::Deferred);
            }
        };

        if expected > 0 && written != expected {
            remove_partial(&partial).await;
            let reason = format!("size mismatch: expected {expected} bytes, got {written}");
            warn!(media_key = %key, expected, written, "Media size mismatch, will retry");
            self.store.note_media_error(reference, &reason).await?;
            return Ok(MediaOutcome::Deferred);
        }

        if let Err(e) = tokio::fs::rename(&partial, &final_path).await {
            remove_partial(&partial).await;
            let reason = format!("rename failed: {e}");
            warn!(media_key = %key, error = %e, "Media file could not be finalized");
            self.store.note_media_error(reference, &reason).await?;
            return Ok(MediaOutcome::Deferred);
        }

        self.store
            .record_media_complete(reference, &relative_path, written)
            .await?;
        debug!(media_key = %key, bytes = written, path = %relative_path, "Media stored");
        Ok(MediaOutcome::Downloaded { bytes: written })
    }
}

/// Stream chunks into `path`, truncating any leftover, and sync to disk.
async fn write_chunks(path: &Path, mut chunks: ChunkStream) -> Result<u64, WriteFailure> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(WriteFailure::Io)?;
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(WriteFailure::Io)?;
    let mut written: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| WriteFailure::Remote(e.to_string()))?;
        file.write_all(&chunk).await.map_err(WriteFailure::Io)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(WriteFailure::Io)?;
    file.sync_all().await.map_err(WriteFailure::Io)?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial media file");
        }
    }
}
