//! Logging initialization for the engine.
//!
//! Thin wrapper over the observability crate: JSONL to `<base>/logs`, plus
//! stderr when `CHATVAULT_LOG_STDERR` is not disabled.

use crate::{CoreError, CoreResult, Paths};

const SERVICE_NAME: &str = "chatvault";

/// Initialize tracing for the engine.
///
/// # Arguments
///
/// * `level` - Default log level, overridden by `RUST_LOG` when set
/// * `paths` - Resolves the log file location
pub fn init_logging(level: &str, paths: &Paths) -> CoreResult<()> {
    let also_stderr = std::env::var("CHATVAULT_LOG_STDERR")
        .map(|raw| !matches!(raw.trim(), "0" | "false" | "no"))
        .unwrap_or(true);

    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })
    .map_err(|e| CoreError::Config(format!("cannot open log file: {e}")))
}
