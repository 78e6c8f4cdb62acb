//! Scenario tests for the sync engine.
//!
//! - `harness.rs`     - Mock remote, temp-dir store, and builders
//! - `backfill.rs`    - Paging, resume, catch-up, and the message limit
//! - `media.rs`       - At-most-once downloads and failure handling
//! - `live.rs`        - Live merging, restarts, and duplicates
//! - `gate_pacing.rs` - Flood waits and pacing seen end to end
//! - `coordinator.rs` - Source isolation, discovery, and daemon mode

mod backfill;
pub(crate) mod harness;
mod media;
