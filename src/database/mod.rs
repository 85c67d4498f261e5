//! Persistence layer
//!
//! Services depend on [`ReconciliationStore`]; [`MemoryStore`] backs tests and
//! database-less runs, [`postgres::PgStore`] backs production.

pub mod error;
pub mod memory;
pub mod models;
#[cfg(feature = "database")]
pub mod postgres;
pub mod store;

pub use error::DatabaseError;
pub use memory::MemoryStore;
pub use store::{ReconciliationStore, Reservation, SettleCommand, SettleOutcome};
