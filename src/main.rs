use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use recharge_backend::api::{build_router, AppState};
use recharge_backend::bank::{BankClient, CredentialStore};
use recharge_backend::config::AppConfig;
use recharge_backend::database::{MemoryStore, ReconciliationStore};
use recharge_backend::logging::init_tracing;
use recharge_backend::services::{
    RechargeService, RechargeSettings, ReconciliationService, TransactionLedger, WalletLedger,
};
use recharge_backend::workers::{ExpirySweeper, HistoryBackfill};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting recharge reconciliation service");

    let config = AppConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let settings = RechargeSettings::from_config(&config)?;

    let store = connect_store(&config).await?;

    let credentials = Arc::new(CredentialStore::from_config(&config.bank));
    if !credentials.has_credentials().await {
        match &config.bank.password {
            Some(password) => {
                if let Err(e) = credentials.generate(password).await {
                    // Resolutions fail with a credential error until this succeeds
                    error!(error = %e, "Initial bank token issuance failed");
                }
            }
            None => warn!("No bank tokens or login configured; lookups will fail"),
        }
    }

    let bank = Arc::new(BankClient::from_config(&config.bank, credentials));
    let wallets = Arc::new(WalletLedger::new(store.clone()));
    let recharge = Arc::new(RechargeService::new(
        store.clone(),
        bank.clone(),
        wallets.clone(),
        settings.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationService::new(store.clone(), wallets));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    let sweeper = ExpirySweeper::new(store.clone(), (&config.workers).into());
    let rx = shutdown_rx.clone();
    workers.push(tokio::spawn(async move { sweeper.run(rx).await }));

    if config.workers.history_backfill_enabled {
        let backfill = HistoryBackfill::new(
            bank,
            Arc::new(TransactionLedger::new(store.clone())),
            settings,
            (&config.workers).into(),
        );
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { backfill.run(rx).await }));
    }

    let app = build_router(AppState {
        recharge,
        reconciliation,
        store,
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("Failed to bind {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for workers");
    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }

    info!("Recharge reconciliation service stopped");
    Ok(())
}

#[cfg(feature = "database")]
async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ReconciliationStore>> {
    use recharge_backend::database::postgres::PgStore;

    match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url, config.database.max_connections).await?;
            store.run_migrations().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("database.url not set, using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "database"))]
async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ReconciliationStore>> {
    if config.database.url.is_some() {
        warn!("database.url is set but the database feature is disabled");
    }
    warn!("Using the in-memory store; balances are lost on restart");
    Ok(Arc::new(MemoryStore::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
