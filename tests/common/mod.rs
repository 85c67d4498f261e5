//! Shared fixtures: a mocked partner bank and a fully wired service stack
//! over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use recharge_backend::api::AppState;
use recharge_backend::bank::{BankClient, CredentialStore, Credentials};
use recharge_backend::database::models::{
    AuditEntry, BankTransaction, FailureReason, NewBankTransaction, NewRechargeRequest,
    RechargeRequest, RechargeStatus, Wallet, WalletStatus, WalletTransaction,
};
use recharge_backend::database::{
    DatabaseError, MemoryStore, ReconciliationStore, Reservation, SettleCommand, SettleOutcome,
};
use recharge_backend::services::{
    RechargeClaim, RechargeService, RechargeSettings, ReconciliationService, WalletLedger,
};

pub const PHONE: &str = "04141234567";
pub const BANK: &str = "0172";
pub const OTHER_BANK: &str = "0105";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn settings() -> RechargeSettings {
    RechargeSettings {
        search_window_days: 3,
        amount_tolerance: dec("0.01"),
        request_ttl: ChronoDuration::hours(24),
        utc_offset_hours: -4,
    }
}

pub fn today() -> NaiveDate {
    settings().today()
}

pub fn days_ago(days: i64) -> NaiveDate {
    today() - ChronoDuration::days(days)
}

pub fn claim(user_id: &str, amount: &str, last_four: &str) -> RechargeClaim {
    RechargeClaim {
        user_id: user_id.to_string(),
        phone: PHONE.to_string(),
        amount: dec(amount),
        bank: BANK.to_string(),
        last_four: last_four.to_string(),
    }
}

// ============================================================================
// Partner bank mocks
// ============================================================================

pub fn movement(reference: &str, amount: &str, bank: &str, date: NaiveDate, time: &str) -> Value {
    json!({
        "ID": reference.len(),
        "NroReferencia": reference,
        "NroReferenciaCorto": &reference[reference.len() - 4..],
        "Amount": amount,
        "PhoneOrig": PHONE,
        "PhoneDest": "04241112233",
        "BancoOrig": bank,
        "FechaMovimiento": date.format("%Y-%m-%d").to_string(),
        "HoraMovimiento": time,
    })
}

/// Movements returned for one calendar day
pub async fn mount_day(server: &MockServer, date: NaiveDate, movements: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/movements/mobile/find"))
        .and(body_partial_json(json!({ "Date": date.format("%Y-%m-%d").to_string() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "Message": "OK",
            "lista": movements,
        })))
        .mount(server)
        .await;
}

/// Days without an explicit mock come back empty
pub async fn mount_empty_days(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/movements/mobile/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "Message": "OK",
            "lista": [],
        })))
        .with_priority(10)
        .mount(server)
        .await;
}

pub fn valid_credentials() -> Credentials {
    Credentials::new(
        "test-access",
        "test-refresh",
        Utc::now().timestamp() + 3600,
    )
}

pub fn bank_client(server: &MockServer, credentials: Credentials, timeout: Duration) -> BankClient {
    let store = Arc::new(CredentialStore::new(
        server.uri(),
        Some(credentials),
        300,
        timeout,
    ));
    BankClient::new(server.uri(), store, timeout, Duration::from_secs(600))
}

// ============================================================================
// Wired stack
// ============================================================================

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<dyn ReconciliationStore>,
    pub recharge: Arc<RechargeService>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn ReconciliationStore>) -> Self {
        let server = MockServer::start().await;
        mount_empty_days(&server).await;

        let bank = Arc::new(bank_client(
            &server,
            valid_credentials(),
            Duration::from_secs(1),
        ));
        let wallets = Arc::new(WalletLedger::new(store.clone()));
        let recharge = Arc::new(RechargeService::new(
            store.clone(),
            bank,
            wallets.clone(),
            settings(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(store.clone(), wallets));

        Self {
            server,
            store,
            recharge,
            reconciliation,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            recharge: self.recharge.clone(),
            reconciliation: self.reconciliation.clone(),
            store: self.store.clone(),
        }
    }

    pub async fn wallet_of(&self, user_id: &str) -> Wallet {
        self.store.get_or_create_wallet(user_id).await.unwrap()
    }

    pub async fn bank_tx_by_reference(&self, reference: &str) -> BankTransaction {
        let since = (today() - ChronoDuration::days(30)).and_hms_opt(0, 0, 0).unwrap();
        self.store
            .find_cached_bank_transactions(PHONE, since)
            .await
            .unwrap()
            .into_iter()
            .find(|tx| tx.reference == reference)
            .unwrap()
    }
}

// ============================================================================
// Store with injectable faults
// ============================================================================

/// Wraps [`MemoryStore`]; writes can be made to fail and settle can
/// behave like the loser of a race between two resolves of one request
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_finalize: AtomicBool,
    fail_upserts: AtomicBool,
    lose_settle_race: AtomicBool,
}

impl FaultyStore {
    pub fn failing_finalize() -> Self {
        let store = Self::default();
        store.fail_finalize.store(true, Ordering::SeqCst);
        store
    }

    pub fn failing_upserts() -> Self {
        let store = Self::default();
        store.fail_upserts.store(true, Ordering::SeqCst);
        store
    }

    /// Each settle commits, then reports the request as already closed
    pub fn losing_settle_race() -> Self {
        let store = Self::default();
        store.lose_settle_race.store(true, Ordering::SeqCst);
        store
    }

    pub fn heal(&self) {
        self.fail_finalize.store(false, Ordering::SeqCst);
        self.fail_upserts.store(false, Ordering::SeqCst);
        self.lose_settle_race.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReconciliationStore for FaultyStore {
    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.inner.health_check().await
    }

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError> {
        self.inner.get_or_create_wallet(user_id).await
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        self.inner.find_wallet(wallet_id).await
    }

    async fn set_wallet_status(
        &self,
        wallet_id: Uuid,
        status: WalletStatus,
    ) -> Result<Wallet, DatabaseError> {
        self.inner.set_wallet_status(wallet_id, status).await
    }

    async fn find_wallet_transaction_by_bank_tx(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Option<WalletTransaction>, DatabaseError> {
        self.inner
            .find_wallet_transaction_by_bank_tx(bank_transaction_id)
            .await
    }

    async fn insert_recharge_request(
        &self,
        request: NewRechargeRequest,
    ) -> Result<RechargeRequest, DatabaseError> {
        self.inner.insert_recharge_request(request).await
    }

    async fn find_recharge_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<RechargeRequest>, DatabaseError> {
        self.inner.find_recharge_request(request_id).await
    }

    async fn mark_request_failed(
        &self,
        request_id: Uuid,
        reason: FailureReason,
    ) -> Result<Option<RechargeRequest>, DatabaseError> {
        self.inner.mark_request_failed(request_id, reason).await
    }

    async fn expire_stale_requests(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.inner.expire_stale_requests(now).await
    }

    async fn list_open_requests(&self) -> Result<Vec<RechargeRequest>, DatabaseError> {
        self.inner.list_open_requests().await
    }

    async fn upsert_bank_transaction(
        &self,
        tx: NewBankTransaction,
    ) -> Result<BankTransaction, DatabaseError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(DatabaseError::Connection("connection reset".to_string()));
        }
        self.inner.upsert_bank_transaction(tx).await
    }

    async fn find_cached_bank_transactions(
        &self,
        phone_orig: &str,
        since: NaiveDateTime,
    ) -> Result<Vec<BankTransaction>, DatabaseError> {
        self.inner
            .find_cached_bank_transactions(phone_orig, since)
            .await
    }

    async fn find_bank_transaction(
        &self,
        id: Uuid,
    ) -> Result<Option<BankTransaction>, DatabaseError> {
        self.inner.find_bank_transaction(id).await
    }

    async fn list_pending_bank_transactions(&self) -> Result<Vec<BankTransaction>, DatabaseError> {
        self.inner.list_pending_bank_transactions().await
    }

    async fn reserve_bank_transaction(
        &self,
        id: Uuid,
        request_id: Uuid,
        user_id: &str,
    ) -> Result<Reservation, DatabaseError> {
        self.inner
            .reserve_bank_transaction(id, request_id, user_id)
            .await
    }

    async fn release_reservation(
        &self,
        id: Uuid,
        request_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        self.inner.release_reservation(id, request_id).await
    }

    async fn settle(&self, command: SettleCommand) -> Result<SettleOutcome, DatabaseError> {
        let outcome = self.inner.settle(command).await?;
        if self.lose_settle_race.load(Ordering::SeqCst) {
            return Ok(SettleOutcome::RequestClosed {
                status: RechargeStatus::Matched,
            });
        }
        Ok(outcome)
    }

    async fn finalize_bank_transaction(
        &self,
        id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<(), DatabaseError> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(DatabaseError::Connection("connection reset".to_string()));
        }
        self.inner
            .finalize_bank_transaction(id, wallet_transaction_id)
            .await
    }

    async fn list_audit_entries(&self) -> Result<Vec<AuditEntry>, DatabaseError> {
        self.inner.list_audit_entries().await
    }
}
