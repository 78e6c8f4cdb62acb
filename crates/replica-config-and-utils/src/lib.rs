//! Configuration, file system layout, and logging bootstrap for Chatvault.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, GateSettings, DEFAULT_LOG_LEVEL, DEFAULT_PAGE_SIZE};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
