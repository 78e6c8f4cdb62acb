//! History backfill for one source.
//!
//! Backfill walks a source's history from newest to oldest, one page at a
//! time, committing each page together with the cursor movement it causes.
//! A run that stops anywhere (crash, limit, remote outage) resumes from the
//! committed cursor.
//!
//! When a source was backfilled before, the walk first catches up from the
//! newest message down to `history_top`, picking up messages that arrived
//! while the engine was offline, then continues downward from
//! `oldest_fetched` until the remote reports nothing older.

use crate::progress::SyncProgress;
use crate::report::{BackfillOutcome, BackfillStop};
use crate::{SyncError, SyncResult};
use replica_database::{LocalStore, MessageId, SourceId};
use request_gate::{HistoryPage, RemoteTransport, RequestGate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on messages backfill may upsert in one run, shared by all sources.
#[derive(Debug, Clone, Default)]
pub struct MessageBudget {
    remaining: Option<Arc<AtomicU64>>,
}

impl MessageBudget {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            remaining: limit.map(|n| Arc::new(AtomicU64::new(n))),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining.as_ref().map(|r| r.load(Ordering::Acquire))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// Charge `n` upserted messages. Returns `true` once the budget is spent.
    pub fn consume(&self, n: u64) -> bool {
        match &self.remaining {
            None => false,
            Some(remaining) => {
                let previous = remaining
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                        Some(r.saturating_sub(n))
                    })
                    .unwrap_or(0);
                previous <= n
            }
        }
    }
}

/// Fetched page with the bounds backfill needs.
struct CheckedPage {
    page: HistoryPage,
    min: MessageId,
    max: MessageId,
}

enum CatchUp {
    /// Caught up with `history_top`; continue backward.
    Reached,
    Stop(BackfillStop),
}

/// Backfills sources through a shared gate.
pub struct Backfiller<T: RemoteTransport> {
    store: LocalStore,
    gate: Arc<RequestGate<T>>,
    page_size: usize,
    budget: MessageBudget,
    progress: Arc<dyn SyncProgress>,
}

impl<T: RemoteTransport> Backfiller<T> {
    pub fn new(
        store: LocalStore,
        gate: Arc<RequestGate<T>>,
        page_size: usize,
        budget: MessageBudget,
        progress: Arc<dyn SyncProgress>,
    ) -> Self {
        let page_size = page_size.clamp(1, gate.max_page_size().max(1));
        Self {
            store,
            gate,
            page_size,
            budget,
            progress,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Backfill one source until its history is exhausted or the budget runs out.
    pub async fn run(&self, source: &SourceId) -> SyncResult<BackfillOutcome> {
        let (outcome, result) = self.run_tracked(source).await;
        result.map(|()| outcome)
    }

    /// Like [`run`](Self::run), but the pages and records committed before a
    /// failure are returned alongside it.
    pub async fn run_tracked(&self, source: &SourceId) -> (BackfillOutcome, SyncResult<()>) {
        let mut outcome = BackfillOutcome {
            source: source.clone(),
            pages: 0,
            records: 0,
            stop: BackfillStop::Exhausted,
        };
        let result = self.drive(source, &mut outcome).await;
        if result.is_ok() {
            info!(
                source = %source,
                pages = outcome.pages,
                records = outcome.records,
                stop = ?outcome.stop,
                "Backfill finished"
            );
        }
        (outcome, result)
    }

    async fn drive(&self, source: &SourceId, outcome: &mut BackfillOutcome) -> SyncResult<()> {
        let mut cursor = self.store.get_cursor(source).await?;

        if self.budget.is_exhausted() {
            outcome.stop = BackfillStop::LimitReached;
            return Ok(());
        }

        if let (Some(_), Some(top)) = (cursor.oldest_fetched, cursor.history_top) {
            if let CatchUp::Stop(stop) = self.catch_up(source, top, outcome).await? {
                outcome.stop = stop;
                return Ok(());
            }
            // A catch-up page can reach below the stored range.
            cursor = self.store.get_cursor(source).await?;
        }

        if cursor.backfill_complete {
            debug!(source = %source, "History already complete");
            outcome.stop = BackfillStop::AlreadyComplete;
            return Ok(());
        }

        outcome.stop = self.walk_back(source, cursor.oldest_fetched, outcome).await?;
        Ok(())
    }

    /// Walk from the newest message down to `old_top`.
    async fn catch_up(
        &self,
        source: &SourceId,
        old_top: MessageId,
        outcome: &mut BackfillOutcome,
    ) -> SyncResult<CatchUp> {
        let mut before: Option<MessageId> = None;
        let mut new_top: Option<MessageId> = None;

        loop {
            if self.budget.is_exhausted() {
                return Ok(CatchUp::Stop(BackfillStop::LimitReached));
            }

            let Some(checked) = self.fetch_page(source, before).await? else {
                return Ok(CatchUp::Reached);
            };
            let top = *new_top.get_or_insert(checked.max);
            let reached = checked.min <= old_top;
            let short = self.is_last_page(&checked.page);

            // history_top may only rise once everything down to the old top is stored.
            let covered_top = (reached || short).then_some(top);
            let min = checked.min;
            let spent = self.apply(source, checked, covered_top, outcome).await?;

            if reached {
                debug!(source = %source, new_top = %top, "Caught up with stored history");
                return Ok(CatchUp::Reached);
            }
            if short {
                self.store.mark_backfill_complete(source).await?;
                return Ok(CatchUp::Stop(BackfillStop::Exhausted));
            }
            if spent {
                return Ok(CatchUp::Stop(BackfillStop::LimitReached));
            }
            before = Some(min);
        }
    }

    /// Walk backward from `start` (the newest message when `None`).
    async fn walk_back(
        &self,
        source: &SourceId,
        start: Option<MessageId>,
        outcome: &mut BackfillOutcome,
    ) -> SyncResult<BackfillStop> {
        let mut before = start;

        loop {
            if self.budget.is_exhausted() {
                return Ok(BackfillStop::LimitReached);
            }

            let Some(checked) = self.fetch_page(source, before).await? else {
                self.store.mark_backfill_complete(source).await?;
                return Ok(BackfillStop::Exhausted);
            };
            let short = self.is_last_page(&checked.page);
            let covered_top = before.is_none().then_some(checked.max);
            let min = checked.min;
            let spent = self.apply(source, checked, covered_top, outcome).await?;

            if short {
                self.store.mark_backfill_complete(source).await?;
                return Ok(BackfillStop::Exhausted);
            }
            if spent {
                return Ok(BackfillStop::LimitReached);
            }
            before = Some(min);
        }
    }

    fn is_last_page(&self, page: &HistoryPage) -> bool {
        page.records.len() < self.page_size || !page.has_more
    }

    /// Fetch a page and refuse any page that would not move backfill forward.
    /// Returns `None` for an empty page.
    async fn fetch_page(
        &self,
        source: &SourceId,
        before: Option<MessageId>,
    ) -> SyncResult<Option<CheckedPage>> {
        let page = self
            .gate
            .fetch_history_page(source, before, self.page_size)
            .await?;

        if let Some(stray) = page.records.iter().find(|r| &r.source != source) {
            return Err(SyncError::RemoteAnomaly {
                source_id: source.clone(),
                detail: format!("page contains message {} from {}", stray.id, stray.source),
            });
        }

        let (Some(min), Some(max)) = (
            page.records.iter().map(|r| r.id).min(),
            page.records.iter().map(|r| r.id).max(),
        ) else {
            return Ok(None);
        };

        // Also rejects a page identical to the previous one, whose minimum is `before`.
        if let Some(before) = before {
            if min >= before {
                return Err(SyncError::RemoteAnomaly {
                    source_id: source.clone(),
                    detail: format!("page older than {before} starts at {min}"),
                });
            }
        }

        Ok(Some(CheckedPage { page, min, max }))
    }

    /// Commit a page. Returns `true` when the budget is now spent.
    async fn apply(
        &self,
        source: &SourceId,
        checked: CheckedPage,
        covered_top: Option<MessageId>,
        outcome: &mut BackfillOutcome,
    ) -> SyncResult<bool> {
        let count = checked.page.records.len();
        self.store
            .apply_history_page(source, checked.page.records, covered_top)
            .await?;

        outcome.pages += 1;
        outcome.records += count;
        self.progress.on_backfill_page(source, count, checked.min);

        Ok(self.budget.consume(count as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_never_runs_out() {
        let budget = MessageBudget::unlimited();
        assert!(!budget.consume(1_000_000));
        assert!(!budget.is_exhausted());
        assert_eq!(budget.remaining(), None);
    }

    #[test]
    fn budget_is_shared_between_clones() {
        let budget = MessageBudget::new(Some(150));
        let other = budget.clone();

        assert!(!budget.consume(100));
        assert_eq!(other.remaining(), Some(50));
        assert!(other.consume(100));
        assert!(budget.is_exhausted());
        assert!(budget.consume(1));
    }

    #[test]
    fn zero_budget_starts_exhausted() {
        assert!(MessageBudget::new(Some(0)).is_exhausted());
    }
}
