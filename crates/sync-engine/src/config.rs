//! Engine runtime settings.

use replica_config_and_utils::{Config, Paths, DEFAULT_PAGE_SIZE};
use replica_database::SourceId;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Requested page size; clamped to the remote maximum.
    pub page_size: usize,
    /// Messages backfill may upsert across all sources in one run.
    pub message_limit: Option<u64>,
    /// Merge live updates and keep fetching media until shutdown.
    pub daemon: bool,
    /// Explicit sources. Empty means ask the remote.
    pub sources: Vec<SourceId>,
    pub backfill_workers: usize,
    pub media_batch_size: usize,
    pub media_max_attempts: u32,
    pub media_pass_interval: Duration,
    pub update_restart_delay: Duration,
    /// Base directory media paths are relative to.
    pub replica_root: PathBuf,
}

impl SyncConfig {
    pub fn from_config(config: &Config, paths: &Paths) -> Self {
        Self {
            page_size: config.page_size,
            message_limit: config.message_limit,
            daemon: config.daemon,
            sources: config.sources.iter().map(|s| SourceId::new(s.as_str())).collect(),
            backfill_workers: config.backfill_workers.max(1),
            media_batch_size: config.media_batch_size.max(1),
            media_max_attempts: config.media_max_attempts,
            media_pass_interval: Duration::from_secs(config.media_pass_interval_secs),
            update_restart_delay: Duration::from_millis(config.update_restart_delay_ms),
            replica_root: paths.base_dir().clone(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            message_limit: None,
            daemon: false,
            sources: Vec::new(),
            backfill_workers: 4,
            media_batch_size: 10,
            media_max_attempts: 5,
            media_pass_interval: Duration::from_secs(60),
            update_restart_delay: Duration::from_secs(2),
            replica_root: PathBuf::from("."),
        }
    }
}
