//! The request gate.
//!
//! One async lock guards the pacing state and is held across each remote
//! invocation, so remote I/O forms a single serialized stream no matter how
//! many backfill workers share the gate. The lock is released while a caller
//! sleeps out a retry backoff, letting other requests through.
//!
//! Opening the live update subscription also goes through the gate, so a
//! flood-wait answered to it holds back backfill and media as well.

use crate::{
    GateConfig, GateError, GateResult, HistoryPage, MediaDownload, RemoteError, RemoteTransport,
    UpdateStream,
};
use replica_database::{MediaReference, MessageId, SourceId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Longest flood-wait honoured from a single answer.
pub const MAX_FLOOD_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// A single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    HistoryPage {
        source: SourceId,
        before: Option<MessageId>,
        limit: usize,
    },
    Media(MediaReference),
    ListSources,
    /// Open the live update subscription.
    Subscribe,
}

impl RemoteRequest {
    fn kind(&self) -> &'static str {
        match self {
            Self::HistoryPage { .. } => "history_page",
            Self::Media(_) => "media",
            Self::ListSources => "list_sources",
            Self::Subscribe => "subscribe_updates",
        }
    }

    /// The live merger resubscribes on its own schedule, so a failed
    /// subscription is returned instead of retried here.
    fn retries_transient(&self) -> bool {
        !matches!(self, Self::Subscribe)
    }
}

/// Successful answer to a [`RemoteRequest`].
pub enum RemoteResponse {
    HistoryPage(HistoryPage),
    Media(MediaDownload),
    Sources(Vec<SourceId>),
    Updates(UpdateStream),
}

impl fmt::Debug for RemoteResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HistoryPage(page) => f
                .debug_struct("HistoryPage")
                .field("records", &page.records.len())
                .field("has_more", &page.has_more)
                .finish(),
            Self::Media(download) => fmt::Debug::fmt(download, f),
            Self::Sources(sources) => f.debug_tuple("Sources").field(sources).finish(),
            Self::Updates(_) => f.write_str("Updates"),
        }
    }
}

/// Counters since the gate was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    /// Remote invocations, including retried ones.
    pub calls: u64,
    /// Retries after `Unavailable`.
    pub retries: u64,
    /// `RateLimited` answers absorbed.
    pub flood_waits: u64,
    /// Calls that ended in `RemoteUnavailable`.
    pub exhausted: u64,
}

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    retries: AtomicU64,
    flood_waits: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Default)]
struct PacingState {
    /// Earliest start of the next call under the minimum interval.
    next_allowed: Option<Instant>,
    /// Flood-wait deadline set by the remote.
    cooldown_until: Option<Instant>,
}

impl PacingState {
    fn ready_at(&self) -> Option<Instant> {
        match (self.next_allowed, self.cooldown_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Push the cool-down out to `wait` from now. Never shortens it.
    fn extend_cooldown(&mut self, wait: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(wait.min(MAX_FLOOD_WAIT)).unwrap_or(now);
        self.cooldown_until = Some(match self.cooldown_until {
            Some(current) => current.max(deadline),
            None => deadline,
        });
    }
}

/// Rate-limited, retrying front for a [`RemoteTransport`].
pub struct RequestGate<T: RemoteTransport> {
    transport: Arc<T>,
    config: GateConfig,
    pacing: Mutex<PacingState>,
    counters: Counters,
}

impl<T: RemoteTransport> RequestGate<T> {
    pub fn new(transport: Arc<T>, config: GateConfig) -> Self {
        Self {
            transport,
            config,
            pacing: Mutex::new(PacingState::default()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Largest page the remote accepts.
    pub fn max_page_size(&self) -> usize {
        self.transport.max_page_size()
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            flood_waits: self.counters.flood_waits.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Issue a request, absorbing flood-waits and retrying transient failures.
    pub async fn call(&self, request: RemoteRequest) -> GateResult<RemoteResponse> {
        let mut failures: u32 = 0;

        loop {
            let result = {
                let mut pacing = self.pacing.lock().await;
                if let Some(ready_at) = pacing.ready_at() {
                    sleep_until(ready_at).await;
                }

                let started = Instant::now();
                pacing.next_allowed = Some(started + self.config.min_interval);
                self.counters.calls.fetch_add(1, Ordering::Relaxed);

                let result = self.dispatch(&request).await;
                if let Err(RemoteError::RateLimited(wait)) = &result {
                    pacing.extend_cooldown(*wait);
                }
                result
            };

            match result {
                Ok(response) => return Ok(response),
                Err(RemoteError::RateLimited(wait)) => {
                    self.counters.flood_waits.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request = request.kind(),
                        wait_ms = wait.as_millis() as u64,
                        "Remote requested flood wait"
                    );
                }
                Err(RemoteError::MediaNotFound(id)) => return Err(GateError::MediaNotFound(id)),
                Err(RemoteError::Unavailable(reason)) => {
                    failures += 1;
                    if failures > self.config.max_retries || !request.retries_transient() {
                        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            request = request.kind(),
                            attempts = failures,
                            error = %reason,
                            "Remote call failed, retries exhausted"
                        );
                        return Err(GateError::RemoteUnavailable {
                            attempts: failures,
                            reason,
                        });
                    }

                    let delay = self.config.backoff(failures);
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        request = request.kind(),
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Remote call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn dispatch(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        match request {
            RemoteRequest::HistoryPage {
                source,
                before,
                limit,
            } => self
                .transport
                .fetch_history_page(source, *before, *limit)
                .await
                .map(RemoteResponse::HistoryPage),
            RemoteRequest::Media(reference) => self
                .transport
                .fetch_media(reference)
                .await
                .map(RemoteResponse::Media),
            RemoteRequest::ListSources => self
                .transport
                .list_sources()
                .await
                .map(RemoteResponse::Sources),
            RemoteRequest::Subscribe => self
                .transport
                .subscribe_updates()
                .await
                .map(RemoteResponse::Updates),
        }
    }

    /// Apply a flood-wait the remote signalled outside a gated call, such as
    /// on an already open update stream.
    pub async fn report_flood_wait(&self, wait: Duration) {
        self.pacing.lock().await.extend_cooldown(wait);
        self.counters.flood_waits.fetch_add(1, Ordering::Relaxed);
        warn!(
            wait_ms = wait.as_millis() as u64,
            "Remote requested flood wait on update stream"
        );
    }

    pub async fn fetch_history_page(
        &self,
        source: &SourceId,
        before: Option<MessageId>,
        limit: usize,
    ) -> GateResult<HistoryPage> {
        let request = RemoteRequest::HistoryPage {
            source: source.clone(),
            before,
            limit,
        };
        match self.call(request).await? {
            RemoteResponse::HistoryPage(page) => Ok(page),
            _ => Err(GateError::UnexpectedResponse("history page")),
        }
    }

    /// Open a media download. The body streams outside the gate lock.
    pub async fn fetch_media(&self, reference: &MediaReference) -> GateResult<MediaDownload> {
        match self.call(RemoteRequest::Media(reference.clone())).await? {
            RemoteResponse::Media(download) => Ok(download),
            _ => Err(GateError::UnexpectedResponse("media download")),
        }
    }

    pub async fn list_sources(&self) -> GateResult<Vec<SourceId>> {
        match self.call(RemoteRequest::ListSources).await? {
            RemoteResponse::Sources(sources) => Ok(sources),
            _ => Err(GateError::UnexpectedResponse("source list")),
        }
    }

    /// Open the live update subscription. Records stream outside the gate lock.
    pub async fn subscribe_updates(&self) -> GateResult<UpdateStream> {
        match self.call(RemoteRequest::Subscribe).await? {
            RemoteResponse::Updates(updates) => Ok(updates),
            _ => Err(GateError::UnexpectedResponse("update subscription")),
        }
    }
}
