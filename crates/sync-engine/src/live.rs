//! Live update merger.
//!
//! Applies records from the remote's update subscription in delivery order.
//! Each record is its own store transaction, so redelivered duplicates
//! converge and an edit or delete always lands on the latest copy. The
//! subscription is reopened after `restart_delay` whenever it fails or ends.
//!
//! The subscription is opened through the request gate. A flood-wait
//! delivered on an open stream is handed back to the gate before
//! resubscribing, so it pauses every other remote caller too.

use crate::progress::SyncProgress;
use crate::report::MergeStats;
use crate::SyncResult;
use futures_util::StreamExt;
use replica_database::LocalStore;
use request_gate::{RemoteError, RemoteTransport, RequestGate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct LiveMerger<T: RemoteTransport> {
    store: LocalStore,
    gate: Arc<RequestGate<T>>,
    restart_delay: Duration,
    progress: Arc<dyn SyncProgress>,
}

impl<T: RemoteTransport> LiveMerger<T> {
    pub fn new(
        store: LocalStore,
        gate: Arc<RequestGate<T>>,
        restart_delay: Duration,
        progress: Arc<dyn SyncProgress>,
    ) -> Self {
        Self {
            store,
            gate,
            restart_delay,
            progress,
        }
    }

    /// Merge updates until `shutdown` turns true or its sender is dropped.
    ///
    /// Returns early only on a store failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncResult<MergeStats> {
        let mut stats = MergeStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let subscription = tokio::select! {
                _ = shutdown.changed() => break,
                subscription = self.gate.subscribe_updates() => subscription,
            };

            match subscription {
                Ok(mut updates) => {
                    debug!("Live update subscription open");
                    loop {
                        let next = tokio::select! {
                            _ = shutdown.changed() => return Ok(self.finish(stats)),
                            next = updates.next() => next,
                        };

                        match next {
                            Some(Ok(record)) => {
                                let outcome = self.store.apply_live_update(record.clone()).await?;
                                stats.applied += 1;
                                stats.inserted += outcome.inserted as u64;
                                stats.updated += outcome.updated as u64;
                                self.progress.on_live_applied(&record);
                            }
                            Some(Err(RemoteError::RateLimited(wait))) => {
                                self.gate.report_flood_wait(wait).await;
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Live update stream failed");
                                break;
                            }
                            None => {
                                info!("Live update stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to live updates");
                }
            }

            stats.restarts += 1;
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.restart_delay) => {}
            }
        }

        Ok(self.finish(stats))
    }

    fn finish(&self, stats: MergeStats) -> MergeStats {
        info!(
            applied = stats.applied,
            inserted = stats.inserted,
            updated = stats.updated,
            restarts = stats.restarts,
            "Live merger stopped"
        );
        stats
    }
}
