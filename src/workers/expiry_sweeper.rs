//! Recharge Request Expiry Sweeper
//!
//! Periodically moves pending requests past their deadline to `expired`.
//! Expired requests are no longer resolved automatically but stay available
//! to manual reconciliation.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::database::{DatabaseError, ReconciliationStore};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    pub interval_secs: u64,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl From<&crate::config::WorkerConfig> for ExpirySweeperConfig {
    fn from(config: &crate::config::WorkerConfig) -> Self {
        Self {
            interval_secs: config.expiry_sweep_interval_secs,
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

pub struct ExpirySweeper {
    store: Arc<dyn ReconciliationStore>,
    config: ExpirySweeperConfig,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ReconciliationStore>, config: ExpirySweeperConfig) -> Self {
        Self { store, config }
    }

    /// Main worker loop, runs until the shutdown signal flips
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            "Recharge expiry sweeper started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping expiry sweeper");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Error in expiry sweep");
                    }
                }
            }
        }

        info!("Recharge expiry sweeper stopped");
    }

    /// Single sweep; returns how many requests expired
    #[instrument(skip(self), fields(worker = "expiry_sweeper"))]
    pub async fn sweep_once(&self) -> Result<u64, DatabaseError> {
        let expired = self.store.expire_stale_requests(Utc::now()).await?;
        if expired > 0 {
            info!(expired, "Stale recharge requests expired");
        } else {
            debug!("No stale recharge requests");
        }
        Ok(expired)
    }
}
