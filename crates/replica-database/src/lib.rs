//! SQLite-backed local replica of the message history.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned schema migrations
//! - Model types for messages, media blobs, and sync cursors
//! - Query helpers that run on a plain `&Connection`
//! - `LocalStore`, the transactional API the sync engine uses
//!
//! # Architecture
//!
//! All SQL runs on the single executor thread owned by `AsyncDatabase`.
//! Every `LocalStore` mutation is one SQLite transaction, so a page of
//! messages and the cursor movement it causes commit together or not at all.
//!
//! ```ignore
//! let store = LocalStore::open(&paths.database_file()).await?;
//! let applied = store.apply_history_page(&source, page, None).await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
pub use store::LocalStore;
