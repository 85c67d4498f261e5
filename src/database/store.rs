//! Storage seam for the reconciliation engine
//!
//! Every state change that guards money is conditional on the current status,
//! so implementations must apply each method atomically.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use super::error::DatabaseError;
use super::models::{
    AuditEntry, BankTransaction, FailureReason, NewBankTransaction, NewRechargeRequest,
    RechargeRequest, RechargeStatus, Wallet, WalletStatus, WalletTransaction,
};

/// Result of trying to reserve a bank transaction for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The row is now held by the request. `resumed` is set when it already was.
    Reserved {
        transaction: BankTransaction,
        resumed: bool,
    },
    /// Another request holds or consumed the row
    Taken { holder: Option<Uuid> },
}

/// Everything the atomic settle step needs
#[derive(Debug, Clone)]
pub struct SettleCommand {
    pub bank_transaction_id: Uuid,
    pub recharge_request_id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: String,
    /// The amount the partner reported, not the claimed one
    pub amount_ves: BigDecimal,
    pub reference: String,
    /// Set on the manual path; an audit entry is written with the credit
    pub admin_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Credited {
        wallet: Wallet,
        wallet_transaction: WalletTransaction,
    },
    /// A replay of a settle that already committed
    AlreadyCredited {
        wallet: Wallet,
        wallet_transaction: WalletTransaction,
    },
    WalletSuspended,
    RequestClosed { status: RechargeStatus },
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn health_check(&self) -> Result<(), DatabaseError>;

    // ------------------------------------------------------------------
    // Wallets
    // ------------------------------------------------------------------

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError>;

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError>;

    async fn set_wallet_status(
        &self,
        wallet_id: Uuid,
        status: WalletStatus,
    ) -> Result<Wallet, DatabaseError>;

    async fn find_wallet_transaction_by_bank_tx(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Option<WalletTransaction>, DatabaseError>;

    // ------------------------------------------------------------------
    // Recharge requests
    // ------------------------------------------------------------------

    async fn insert_recharge_request(
        &self,
        request: NewRechargeRequest,
    ) -> Result<RechargeRequest, DatabaseError>;

    async fn find_recharge_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<RechargeRequest>, DatabaseError>;

    /// `pending -> failed`; returns `None` when the request was no longer pending
    async fn mark_request_failed(
        &self,
        request_id: Uuid,
        reason: FailureReason,
    ) -> Result<Option<RechargeRequest>, DatabaseError>;

    /// `pending -> expired` for every request past `expires_at`
    async fn expire_stale_requests(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;

    /// Requests still eligible for a credit: pending and expired
    async fn list_open_requests(&self) -> Result<Vec<RechargeRequest>, DatabaseError>;

    // ------------------------------------------------------------------
    // Bank transactions
    // ------------------------------------------------------------------

    /// Insert keyed by reference; rows no longer pending are left untouched
    async fn upsert_bank_transaction(
        &self,
        tx: NewBankTransaction,
    ) -> Result<BankTransaction, DatabaseError>;

    /// Stored rows from one origin phone on or after `since`, newest first
    async fn find_cached_bank_transactions(
        &self,
        phone_orig: &str,
        since: NaiveDateTime,
    ) -> Result<Vec<BankTransaction>, DatabaseError>;

    async fn find_bank_transaction(
        &self,
        id: Uuid,
    ) -> Result<Option<BankTransaction>, DatabaseError>;

    async fn list_pending_bank_transactions(&self) -> Result<Vec<BankTransaction>, DatabaseError>;

    /// Conditional `pending -> matched`, recording the holder
    async fn reserve_bank_transaction(
        &self,
        id: Uuid,
        request_id: Uuid,
        user_id: &str,
    ) -> Result<Reservation, DatabaseError>;

    /// `matched -> pending`, only while still held by `request_id`
    async fn release_reservation(&self, id: Uuid, request_id: Uuid)
        -> Result<bool, DatabaseError>;

    /// Credit the wallet, record the wallet transaction and close the request
    async fn settle(&self, command: SettleCommand) -> Result<SettleOutcome, DatabaseError>;

    /// `matched -> verified`, linking the wallet transaction
    async fn finalize_bank_transaction(
        &self,
        id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<(), DatabaseError>;

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Newest first
    async fn list_audit_entries(&self) -> Result<Vec<AuditEntry>, DatabaseError>;
}
