//! Test harness for engine scenarios.
//!
//! Provides:
//! - `MockRemote`: an in-memory `RemoteTransport` with scriptable failures
//! - `TestHarness`: a store in a temp directory wired to a gate over the mock
//! - helpers for building messages and media references

use crate::{Backfiller, Coordinator, MediaFetcher, MessageBudget, NoProgress, SyncConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use replica_database::{
    LocalStore, MediaKind, MediaReference, MessageId, MessageRecord, MessageState, SourceId,
};
use request_gate::{
    GateConfig, HistoryPage, MediaDownload, RemoteError, RemoteTransport, RequestGate,
    UpdateStream, DEFAULT_MAX_PAGE_SIZE,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

// =============================================================================
// Message builders
// =============================================================================

pub fn message(source: &str, id: i64) -> MessageRecord {
    MessageRecord {
        source: source.into(),
        id: MessageId(id),
        sender: "alice".to_string(),
        sent_at: DateTime::from_timestamp(1_700_000_000 + id, 0).unwrap(),
        body: format!("message {id}"),
        media: None,
        state: MessageState::Original,
        inserted_at: Utc::now(),
    }
}

pub fn with_media(mut record: MessageRecord, reference: MediaReference) -> MessageRecord {
    record.media = Some(reference);
    record
}

pub fn photo(id: &str, size: u64) -> MediaReference {
    MediaReference {
        id: id.to_string(),
        kind: MediaKind::Photo,
        declared_size: size,
        version: None,
    }
}

pub fn edited(source: &str, id: i64, body: &str) -> MessageRecord {
    MessageRecord {
        body: body.to_string(),
        state: MessageState::Edited,
        ..message(source, id)
    }
}

pub fn deleted(source: &str, id: i64) -> MessageRecord {
    MessageRecord {
        state: MessageState::Deleted,
        ..message(source, id)
    }
}

// =============================================================================
// Mock remote
// =============================================================================

enum Subscription {
    Refuse,
    RateLimit(Duration),
    Deliver(Vec<Result<MessageRecord, RemoteError>>),
}

#[derive(Default)]
struct RemoteState {
    histories: HashMap<SourceId, BTreeMap<i64, MessageRecord>>,
    sources: Vec<SourceId>,
    media: HashMap<String, Vec<u8>>,
    /// Remaining downloads of a key that deliver only half the body.
    truncations: HashMap<String, u32>,
    /// History call number (1-based) answered with a flood wait.
    rate_limits: HashMap<usize, Duration>,
    unavailable: HashSet<SourceId>,
    /// Sources that ignore `before` and always serve the newest page.
    stuck: HashSet<SourceId>,
    /// History pages served before every history call fails.
    fail_after_pages: Option<usize>,
    /// Scripted answers to `subscribe_updates`, in order.
    subscriptions: VecDeque<Subscription>,
    discovery_down: bool,
    history_calls: usize,
    pages_served: usize,
    history_call_times: Vec<Instant>,
    downloads: HashMap<String, usize>,
    subscribe_call_times: Vec<Instant>,
}

/// Scriptable in-memory remote.
///
/// Histories are served newest first, strictly older than `before`. Once the
/// scripted subscriptions are used up, `subscribe_updates` returns a stream
/// that stays open forever.
pub struct MockRemote {
    state: Mutex<RemoteState>,
    max_page_size: usize,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Self::with_max_page_size(DEFAULT_MAX_PAGE_SIZE)
    }

    pub fn with_max_page_size(max_page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RemoteState::default()),
            max_page_size,
        })
    }

    /// Add messages `ids` to a source's history with default content.
    pub fn add_history(&self, source: &str, ids: std::ops::RangeInclusive<i64>) {
        self.add_records(ids.map(|id| message(source, id)).collect());
    }

    pub fn add_records(&self, records: Vec<MessageRecord>) {
        let mut state = self.state.lock().unwrap();
        for record in records {
            if !state.sources.contains(&record.source) {
                state.sources.push(record.source.clone());
            }
            state
                .histories
                .entry(record.source.clone())
                .or_default()
                .insert(record.id.get(), record);
        }
    }

    pub fn add_media(&self, reference: &MediaReference, bytes: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .media
            .insert(reference.key(), bytes);
    }

    /// Serve the next `times` downloads of `reference` cut in half.
    pub fn truncate_media(&self, reference: &MediaReference, times: u32) {
        self.state
            .lock()
            .unwrap()
            .truncations
            .insert(reference.key(), times);
    }

    /// Answer history call number `call` (1-based) with `RateLimited(wait)`.
    pub fn rate_limit_call(&self, call: usize, wait: Duration) {
        self.state.lock().unwrap().rate_limits.insert(call, wait);
    }

    pub fn make_unavailable(&self, source: &str) {
        self.state.lock().unwrap().unavailable.insert(source.into());
    }

    pub fn make_stuck(&self, source: &str) {
        self.state.lock().unwrap().stuck.insert(source.into());
    }

    pub fn fail_after_pages(&self, pages: usize) {
        self.state.lock().unwrap().fail_after_pages = Some(pages);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_after_pages = None;
        state.unavailable.clear();
        state.discovery_down = false;
    }

    pub fn script_updates(&self, items: Vec<Result<MessageRecord, RemoteError>>) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push_back(Subscription::Deliver(items));
    }

    pub fn refuse_subscription(&self) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push_back(Subscription::Refuse);
    }

    /// Answer the next subscription attempt with `RateLimited(wait)`.
    pub fn rate_limit_subscription(&self, wait: Duration) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push_back(Subscription::RateLimit(wait));
    }

    pub fn fail_discovery(&self) {
        self.state.lock().unwrap().discovery_down = true;
    }

    pub fn history_calls(&self) -> usize {
        self.state.lock().unwrap().history_calls
    }

    pub fn history_call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().history_call_times.clone()
    }

    pub fn downloads(&self, reference: &MediaReference) -> usize {
        self.state
            .lock()
            .unwrap()
            .downloads
            .get(&reference.key())
            .copied()
            .unwrap_or(0)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().unwrap().subscribe_call_times.len()
    }

    pub fn subscribe_call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().subscribe_call_times.clone()
    }
}

#[async_trait]
impl RemoteTransport for MockRemote {
    async fn fetch_history_page(
        &self,
        source: &SourceId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<HistoryPage, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.history_calls += 1;
        state.history_call_times.push(Instant::now());

        let call = state.history_calls;
        if let Some(wait) = state.rate_limits.remove(&call) {
            return Err(RemoteError::RateLimited(wait));
        }
        if state.unavailable.contains(source) {
            return Err(RemoteError::Unavailable(format!("{source} is offline")));
        }
        if let Some(pages) = state.fail_after_pages {
            if state.pages_served >= pages {
                return Err(RemoteError::Unavailable("connection reset".into()));
            }
        }

        let upper = if state.stuck.contains(source) {
            None
        } else {
            before
        };
        let page = match state.histories.get(source) {
            None => HistoryPage::default(),
            Some(history) => {
                let records: Vec<MessageRecord> = match upper {
                    Some(before) => history.range(..before.get()).rev(),
                    None => history.range(..).rev(),
                }
                .take(limit)
                .map(|(_, record)| record.clone())
                .collect();
                let has_more = records
                    .last()
                    .map(|oldest| history.range(..oldest.id.get()).next().is_some())
                    .unwrap_or(false);
                HistoryPage { records, has_more }
            }
        };

        state.pages_served += 1;
        Ok(page)
    }

    async fn fetch_media(&self, reference: &MediaReference) -> Result<MediaDownload, RemoteError> {
        let mut state = self.state.lock().unwrap();
        let key = reference.key();
        *state.downloads.entry(key.clone()).or_default() += 1;

        let Some(bytes) = state.media.get(&key).cloned() else {
            return Err(RemoteError::MediaNotFound(reference.id.clone()));
        };
        let body = match state.truncations.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                bytes[..bytes.len() / 2].to_vec()
            }
            _ => bytes.clone(),
        };

        let chunks: Vec<Result<Vec<u8>, RemoteError>> =
            body.chunks(4).map(|chunk| Ok(chunk.to_vec())).collect();
        Ok(MediaDownload {
            declared_size: bytes.len() as u64,
            chunks: stream::iter(chunks).boxed(),
        })
    }

    async fn subscribe_updates(&self) -> Result<UpdateStream, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_call_times.push(Instant::now());
        match state.subscriptions.pop_front() {
            Some(Subscription::Deliver(items)) => Ok(stream::iter(items).boxed()),
            Some(Subscription::Refuse) => {
                Err(RemoteError::Unavailable("subscription refused".into()))
            }
            Some(Subscription::RateLimit(wait)) => Err(RemoteError::RateLimited(wait)),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn list_sources(&self) -> Result<Vec<SourceId>, RemoteError> {
        let state = self.state.lock().unwrap();
        if state.discovery_down {
            return Err(RemoteError::Unavailable("dialogs offline".into()));
        }
        Ok(state.sources.clone())
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }
}

// =============================================================================
// Test harness
// =============================================================================

/// Gate settings that keep retrying tests fast in real time.
pub fn fast_gate() -> GateConfig {
    GateConfig {
        min_interval: Duration::ZERO,
        max_retries: 2,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(4),
    }
}

/// A store in a temp directory and a gate over a `MockRemote`.
pub struct TestHarness {
    pub dir: TempDir,
    pub store: LocalStore,
    pub remote: Arc<MockRemote>,
    pub gate: Arc<RequestGate<MockRemote>>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_gate(MockRemote::new(), fast_gate()).await
    }

    pub async fn with_remote(remote: Arc<MockRemote>) -> Self {
        Self::with_gate(remote, fast_gate()).await
    }

    pub async fn with_gate(remote: Arc<MockRemote>, gate: GateConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(&dir.path().join("chatvault.sqlite"))
            .await
            .unwrap();
        let gate = Arc::new(RequestGate::new(remote.clone(), gate));
        Self {
            dir,
            store,
            remote,
            gate,
        }
    }

    /// A second handle on the same database file, as after a restart.
    pub async fn reopen_store(&self) -> LocalStore {
        LocalStore::open(&self.dir.path().join("chatvault.sqlite"))
            .await
            .unwrap()
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            replica_root: self.dir.path().to_path_buf(),
            media_pass_interval: Duration::from_millis(50),
            update_restart_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    pub fn backfiller(&self, page_size: usize, budget: MessageBudget) -> Backfiller<MockRemote> {
        Backfiller::new(
            self.store.clone(),
            self.gate.clone(),
            page_size,
            budget,
            Arc::new(NoProgress),
        )
    }

    pub fn media_fetcher(&self, max_attempts: u32) -> MediaFetcher<MockRemote> {
        MediaFetcher::new(
            self.store.clone(),
            self.gate.clone(),
            self.dir.path().to_path_buf(),
            10,
            max_attempts,
            Arc::new(NoProgress),
        )
    }

    pub fn coordinator(&self, config: SyncConfig) -> Coordinator<MockRemote> {
        Coordinator::new(self.store.clone(), self.gate.clone(), config)
            .with_progress(Arc::new(NoProgress))
    }

    pub fn media_file(&self, reference: &MediaReference) -> PathBuf {
        self.dir.path().join(crate::media_relative_path(reference))
    }

    /// Stored (id, body, state) for a source, ascending by id.
    pub async fn contents(&self, source: &str) -> Vec<(i64, String, MessageState)> {
        contents_of(&self.store, source).await
    }
}

pub async fn contents_of(store: &LocalStore, source: &str) -> Vec<(i64, String, MessageState)> {
    let mut rows: Vec<_> = store
        .list_messages(&source.into())
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.id.get(), m.body, m.state))
        .collect();
    rows.sort_by_key(|(id, _, _)| *id);
    rows
}

/// Poll `check` every 10ms for up to five seconds.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
