//! Bank History Backfill
//!
//! Mirrors the partner's system-wide movement history for the current day
//! into the local ledger, so later claims can match from cache. The partner
//! allows one history call per 10 minutes; the client refuses earlier calls.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::bank::{BankClient, BankError};
use crate::database::DatabaseError;
use crate::services::{RechargeSettings, TransactionLedger};

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("bank error: {0}")]
    Bank(#[from] BankError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct HistoryBackfillConfig {
    pub interval_secs: u64,
}

impl From<&crate::config::WorkerConfig> for HistoryBackfillConfig {
    fn from(config: &crate::config::WorkerConfig) -> Self {
        Self {
            interval_secs: config.history_backfill_interval_secs,
        }
    }
}

pub struct HistoryBackfill {
    bank: Arc<BankClient>,
    ledger: Arc<TransactionLedger>,
    settings: RechargeSettings,
    config: HistoryBackfillConfig,
}

impl HistoryBackfill {
    pub fn new(
        bank: Arc<BankClient>,
        ledger: Arc<TransactionLedger>,
        settings: RechargeSettings,
        config: HistoryBackfillConfig,
    ) -> Self {
        Self {
            bank,
            ledger,
            settings,
            config,
        }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            "Bank history backfill started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping history backfill");
                    break;
                }
                _ = ticker.tick() => {
                    match self.backfill_once().await {
                        Ok(count) => debug!(count, "History backfill cycle completed"),
                        Err(BackfillError::Bank(BankError::RateLimited { retry_after_secs })) => {
                            debug!(retry_after_secs, "History backfill skipped, partner limit");
                        }
                        Err(e) => error!(error = %e, "Error in history backfill, day not mirrored"),
                    }
                }
            }
        }

        info!("Bank history backfill stopped");
    }

    /// Fetch today's history and upsert it; returns the number of rows stored
    #[instrument(skip(self), fields(worker = "history_backfill"))]
    pub async fn backfill_once(&self) -> Result<usize, BackfillError> {
        let today = self.settings.today();
        let payments = self.bank.search_history(today).await?;
        let fetched = payments.len();

        let stored = self.ledger.record_payments(payments).await.map_err(|e| {
            warn!(date = %today, fetched, error = %e, "Could not store bank history");
            e
        })?;

        info!(date = %today, stored = stored.len(), "Bank history mirrored");
        Ok(stored.len())
    }
}
