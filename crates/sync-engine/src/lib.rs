//! Chatvault sync engine.
//!
//! Keeps a local replica of a remote message history in step with the
//! remote. The engine is built from four workers that share one
//! [`LocalStore`](replica_database::LocalStore) and one
//! [`RequestGate`](request_gate::RequestGate):
//!
//! - [`Backfiller`] walks each source's history from newest to oldest
//! - [`MediaFetcher`] downloads the media referenced by stored messages
//! - [`LiveMerger`] applies new, edited, and deleted messages as they arrive
//! - [`Coordinator`] runs them for a set of sources
//!
//! # Example
//!
//! ```ignore
//! let store = LocalStore::open(&paths.database_file()).await?;
//! let gate = Arc::new(RequestGate::new(transport, GateConfig::from(&config.gate)));
//! let coordinator = Coordinator::new(store, gate, SyncConfig::from_config(&config, &paths));
//! let report = coordinator.run(shutdown_rx).await?;
//! ```

mod backfill;
mod config;
mod coordinator;
mod error;
mod live;
mod media;
mod progress;
mod report;

#[cfg(test)]
mod tests;

pub use backfill::{Backfiller, MessageBudget};
pub use config::SyncConfig;
pub use coordinator::Coordinator;
pub use error::{SyncError, SyncResult};
pub use live::LiveMerger;
pub use media::{media_relative_path, MediaFetcher};
pub use progress::{NoProgress, SyncProgress, TracingProgress};
pub use report::{
    BackfillOutcome, BackfillStop, MediaOutcome, MediaSummary, MergeStats, SourceReport,
    SourceStatus, SyncReport,
};
