//! Engine configuration.
//!
//! Loaded from `<base>/config.json`; any field missing from the file takes
//! its default. A handful of environment variables override the file so a
//! one-off run can change the limit or mode without editing it.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default history page size. Also the usual remote maximum.
pub const DEFAULT_PAGE_SIZE: usize = 100;

const ENV_LOG_LEVEL: &str = "CHATVAULT_LOG_LEVEL";
const ENV_MESSAGE_LIMIT: &str = "CHATVAULT_MESSAGE_LIMIT";
const ENV_DAEMON: &str = "CHATVAULT_DAEMON";
const ENV_PAGE_SIZE: &str = "CHATVAULT_PAGE_SIZE";

/// Pacing and retry settings for the request gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Minimum spacing between two remote calls, in milliseconds.
    pub min_interval_ms: u64,
    /// Transient-failure retries before a call fails.
    pub max_retries: u32,
    /// First retry delay, in milliseconds.
    pub backoff_base_ms: u64,
    /// Cap on the retry delay, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 350,
            max_retries: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Messages requested per history page.
    pub page_size: usize,
    /// Cap on messages upserted by backfill across all sources in one run.
    pub message_limit: Option<u64>,
    /// Keep running and merge live updates after backfill.
    pub daemon: bool,
    /// Sources to back up. Empty means every source the remote lists.
    pub sources: Vec<String>,
    /// Sources backfilled in parallel.
    pub backfill_workers: usize,
    /// Pending media references fetched per batch.
    pub media_batch_size: usize,
    /// Attempts before a media reference is given up on.
    pub media_max_attempts: u32,
    /// Seconds between media passes in daemon mode.
    pub media_pass_interval_secs: u64,
    /// Delay before resubscribing after the update stream drops, in milliseconds.
    pub update_restart_delay_ms: u64,
    /// Request gate settings.
    pub gate: GateSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            message_limit: None,
            daemon: false,
            sources: Vec::new(),
            backfill_workers: 4,
            media_batch_size: 10,
            media_max_attempts: 5,
            media_pass_interval_secs: 60,
            update_restart_delay_ms: 2_000,
            gate: GateSettings::default(),
        }
    }
}

impl Config {
    /// Load `config.json` from the base directory, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config");
            Self::load_from_file(&config_path)?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `config.json` in the base directory.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`Config::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(raw) = lookup(ENV_MESSAGE_LIMIT) {
            let raw = raw.trim();
            self.message_limit = if raw.is_empty() || raw == "none" {
                None
            } else {
                Some(raw.parse().map_err(|_| {
                    CoreError::Config(format!("{ENV_MESSAGE_LIMIT} is not a number: {raw}"))
                })?)
            };
        }
        if let Some(raw) = lookup(ENV_DAEMON) {
            self.daemon = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(raw) = lookup(ENV_PAGE_SIZE) {
            self.page_size = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!("{ENV_PAGE_SIZE} is not a number: {raw}"))
            })?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.page_size == 0 {
            return Err(CoreError::Config("page_size must be at least 1".into()));
        }
        if self.backfill_workers == 0 {
            return Err(CoreError::Config("backfill_workers must be at least 1".into()));
        }
        if self.media_batch_size == 0 {
            return Err(CoreError::Config("media_batch_size must be at least 1".into()));
        }
        if self.gate.backoff_max_ms < self.gate.backoff_base_ms {
            return Err(CoreError::Config(
                "gate.backoff_max_ms must not be below gate.backoff_base_ms".into(),
            ));
        }
        Ok(())
    }
}
