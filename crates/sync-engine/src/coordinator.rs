//! Sync coordinator.
//!
//! One run resolves the source set, backfills the sources through a bounded
//! worker pool, then drains the media queue. In daemon mode the live merger
//! starts before backfill so updates delivered meanwhile are merged
//! concurrently, and media passes repeat until shutdown.
//!
//! Only a local store failure ends a run early. A failed source discovery
//! falls back to the sources already in the store, and a failed or panicked
//! backfill is reported for its source while the others continue.

use crate::backfill::{Backfiller, MessageBudget};
use crate::live::LiveMerger;
use crate::media::MediaFetcher;
use crate::progress::{SyncProgress, TracingProgress};
use crate::report::{MergeStats, SourceReport, SourceStatus, SyncReport};
use crate::{SyncConfig, SyncResult};
use replica_database::{LocalStore, SourceId};
use request_gate::{RemoteTransport, RequestGate};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

pub struct Coordinator<T: RemoteTransport> {
    store: LocalStore,
    gate: Arc<RequestGate<T>>,
    config: SyncConfig,
    progress: Arc<dyn SyncProgress>,
}

impl<T: RemoteTransport> Coordinator<T> {
    pub fn new(store: LocalStore, gate: Arc<RequestGate<T>>, config: SyncConfig) -> Self {
        Self {
            store,
            gate,
            config,
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn gate(&self) -> &Arc<RequestGate<T>> {
        &self.gate
    }

    /// Run once without live updates, regardless of the daemon setting.
    pub async fn run_once(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        self.backfill_all(&mut report).await?;
        report.media = self.media_fetcher().run_until_drained().await?;
        report.gate = self.gate.stats();
        self.log_report(&report);
        Ok(report)
    }

    /// Run according to the configuration. In daemon mode this returns after
    /// `shutdown` fires (or its sender is dropped).
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> SyncResult<SyncReport> {
        if !self.config.daemon {
            return self.run_once().await;
        }

        let merger = LiveMerger::new(
            self.store.clone(),
            self.gate.clone(),
            self.config.update_restart_delay,
            self.progress.clone(),
        );
        let merger_shutdown = shutdown.clone();
        let mut merger_task: JoinHandle<SyncResult<MergeStats>> =
            tokio::spawn(async move { merger.run(merger_shutdown).await });

        let result = self.run_daemon(shutdown, &mut merger_task).await;
        if result.is_err() {
            merger_task.abort();
        }
        result
    }

    async fn run_daemon(
        &self,
        mut shutdown: watch::Receiver<bool>,
        merger_task: &mut JoinHandle<SyncResult<MergeStats>>,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        self.backfill_all(&mut report).await?;

        let fetcher = self.media_fetcher();
        report.media = fetcher.run_until_drained().await?;

        info!(
            interval_secs = self.config.media_pass_interval.as_secs(),
            "Backfill done, continuing with live updates"
        );

        let mut merger_done = None;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                joined = &mut *merger_task => {
                    merger_done = Some(joined);
                    break;
                }
                _ = tokio::time::sleep(self.config.media_pass_interval) => {
                    let pass = fetcher.run_until_drained().await?;
                    report.media.merge(pass);
                }
            }
        }

        let joined = match merger_done {
            Some(joined) => joined,
            None => (&mut *merger_task).await,
        };
        report.live = Some(match joined {
            Ok(stats) => stats?,
            Err(e) => {
                error!(error = %e, "Live merger task failed");
                MergeStats::default()
            }
        });

        report.gate = self.gate.stats();
        self.log_report(&report);
        Ok(report)
    }

    /// Sources from the configuration, or every source the remote lists.
    pub async fn resolve_sources(&self) -> SyncResult<Vec<SourceId>> {
        if !self.config.sources.is_empty() {
            return Ok(self.config.sources.clone());
        }
        let sources = self.gate.list_sources().await?;
        info!(count = sources.len(), "Discovered sources");
        Ok(sources)
    }

    /// The sources already in the store, used when discovery fails.
    async fn known_sources(&self) -> SyncResult<Vec<SourceId>> {
        let cursors = self.store.list_cursors().await?;
        Ok(cursors.into_iter().map(|c| c.source).collect())
    }

    async fn backfill_all(&self, report: &mut SyncReport) -> SyncResult<()> {
        let sources = match self.resolve_sources().await {
            Ok(sources) => sources,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let known = self.known_sources().await?;
                warn!(
                    error = %e,
                    known = known.len(),
                    "Source discovery failed, using sources already in the store"
                );
                report.discovery_error = Some(e.to_string());
                known
            }
        };
        let backfiller = Arc::new(Backfiller::new(
            self.store.clone(),
            self.gate.clone(),
            self.config.page_size,
            MessageBudget::new(self.config.message_limit),
            self.progress.clone(),
        ));
        let permits = Arc::new(Semaphore::new(self.config.backfill_workers.max(1)));

        info!(
            sources = sources.len(),
            workers = self.config.backfill_workers,
            page_size = backfiller.page_size(),
            limit = ?self.config.message_limit,
            "Starting backfill"
        );

        let mut tasks = JoinSet::new();
        for source in &sources {
            let backfiller = backfiller.clone();
            let permits = permits.clone();
            let source = source.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = permits.acquire_owned().await.ok();
                backfiller.run_tracked(&source).await
            });
        }

        let mut reports = Vec::with_capacity(sources.len());
        while let Some(joined) = tasks.join_next().await {
            let (outcome, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    // The source is filled in below once every task is joined.
                    error!(error = %e, "Backfill task panicked");
                    continue;
                }
            };

            let source_report = match result {
                Ok(()) => SourceReport::from(outcome),
                Err(e) if e.is_fatal() => {
                    error!(source = %outcome.source, error = %e, "Local store failed, aborting run");
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        source = %outcome.source,
                        pages = outcome.pages,
                        records = outcome.records,
                        error = %e,
                        "Backfill failed for source"
                    );
                    SourceReport {
                        source: outcome.source,
                        status: SourceStatus::Failed(e.to_string()),
                        pages: outcome.pages,
                        records: outcome.records,
                    }
                }
            };
            self.progress.on_source_finished(&source_report);
            reports.push(source_report);
        }

        for source in &sources {
            if !reports.iter().any(|r| &r.source == source) {
                let source_report = SourceReport {
                    source: source.clone(),
                    status: SourceStatus::Failed("task panicked".to_string()),
                    pages: 0,
                    records: 0,
                };
                self.progress.on_source_finished(&source_report);
                reports.push(source_report);
            }
        }

        // Report in configured order, not completion order.
        reports.sort_by_key(|r| sources.iter().position(|s| s == &r.source));
        report.sources = reports;
        Ok(())
    }

    fn media_fetcher(&self) -> MediaFetcher<T> {
        MediaFetcher::new(
            self.store.clone(),
            self.gate.clone(),
            self.config.replica_root.clone(),
            self.config.media_batch_size,
            self.config.media_max_attempts,
            self.progress.clone(),
        )
    }

    fn log_report(&self, report: &SyncReport) {
        for source in &report.sources {
            match &source.status {
                SourceStatus::Failed(reason) => warn!(
                    source = %source.source,
                    error = %reason,
                    "Source not fully synced"
                ),
                status => info!(
                    source = %source.source,
                    status = status.label(),
                    pages = source.pages,
                    records = source.records,
                    "Source synced"
                ),
            }
        }
        info!(
            calls = report.gate.calls,
            retries = report.gate.retries,
            flood_waits = report.gate.flood_waits,
            summary = %report,
            "Sync run complete"
        );
    }
}
