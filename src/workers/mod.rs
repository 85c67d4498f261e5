//! Background workers
//!
//! Each worker owns a `run` loop that ticks on an interval and exits when the
//! shared `watch` shutdown channel changes.

pub mod expiry_sweeper;
pub mod history_backfill;

pub use expiry_sweeper::{ExpirySweeper, ExpirySweeperConfig};
pub use history_backfill::{BackfillError, HistoryBackfill, HistoryBackfillConfig};
