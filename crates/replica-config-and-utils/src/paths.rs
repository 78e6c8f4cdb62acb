//! File system paths for the engine.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory name under the home directory when no target is given.
const DEFAULT_DIR_NAME: &str = ".chatvault";
const DATABASE_FILE_NAME: &str = "chatvault.sqlite";
const LOG_FILE_NAME: &str = "chatvault.jsonl";

/// Manages file system paths for the local replica.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.chatvault or an explicit target directory)
    base_dir: PathBuf,
}

impl Paths {
    /// Use `~/.chatvault` as the base directory.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(DEFAULT_DIR_NAME),
        })
    }

    /// Use an explicit target directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (<base>/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the database file path (<base>/chatvault.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    /// Get the media directory (<base>/media).
    pub fn media_dir(&self) -> PathBuf {
        self.base_dir.join("media")
    }

    /// Get the logs directory (<base>/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (<base>/logs/chatvault.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.media_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
