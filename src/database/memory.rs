//! In-process store
//!
//! One async mutex guards all tables, so every trait method is atomic. Used
//! when no database URL is configured and throughout the test suite.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::DatabaseError;
use super::models::{
    AuditEntry, BankTransaction, BankTxStatus, FailureReason, NewBankTransaction,
    NewRechargeRequest, RechargeRequest, RechargeStatus, Wallet, WalletStatus, WalletTransaction,
};
use super::store::{ReconciliationStore, Reservation, SettleCommand, SettleOutcome};

#[derive(Default)]
struct Tables {
    wallets: HashMap<Uuid, Wallet>,
    wallet_by_user: HashMap<String, Uuid>,
    wallet_transactions: HashMap<Uuid, WalletTransaction>,
    requests: HashMap<Uuid, RechargeRequest>,
    bank_transactions: HashMap<Uuid, BankTransaction>,
    bank_tx_by_reference: HashMap<String, Uuid>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError> {
        let mut t = self.tables.lock().await;
        if let Some(wallet) = t
            .wallet_by_user
            .get(user_id)
            .and_then(|id| t.wallets.get(id))
        {
            return Ok(wallet.clone());
        }

        let wallet = Wallet::new(user_id);
        t.wallet_by_user.insert(user_id.to_string(), wallet.id);
        t.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        Ok(self.tables.lock().await.wallets.get(&wallet_id).cloned())
    }

    async fn set_wallet_status(
        &self,
        wallet_id: Uuid,
        status: WalletStatus,
    ) -> Result<Wallet, DatabaseError> {
        let mut t = self.tables.lock().await;
        let wallet = t
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| DatabaseError::not_found("wallet", wallet_id))?;
        wallet.status = status;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn find_wallet_transaction_by_bank_tx(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Option<WalletTransaction>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .wallet_transactions
            .get(&bank_transaction_id)
            .cloned())
    }

    async fn insert_recharge_request(
        &self,
        request: NewRechargeRequest,
    ) -> Result<RechargeRequest, DatabaseError> {
        let mut t = self.tables.lock().await;
        if !t.wallets.contains_key(&request.wallet_id) {
            return Err(DatabaseError::not_found("wallet", request.wallet_id));
        }
        let request = request.into_request();
        t.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_recharge_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<RechargeRequest>, DatabaseError> {
        Ok(self.tables.lock().await.requests.get(&request_id).cloned())
    }

    async fn mark_request_failed(
        &self,
        request_id: Uuid,
        reason: FailureReason,
    ) -> Result<Option<RechargeRequest>, DatabaseError> {
        let mut t = self.tables.lock().await;
        let request = t
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| DatabaseError::not_found("recharge_request", request_id))?;

        if request.status != RechargeStatus::Pending {
            return Ok(None);
        }
        request.status = RechargeStatus::Failed;
        request.failure_reason = Some(reason);
        request.updated_at = Utc::now();
        Ok(Some(request.clone()))
    }

    async fn expire_stale_requests(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut t = self.tables.lock().await;
        let mut expired = 0;
        for request in t.requests.values_mut() {
            if request.status == RechargeStatus::Pending && request.expires_at < now {
                request.status = RechargeStatus::Expired;
                request.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_open_requests(&self) -> Result<Vec<RechargeRequest>, DatabaseError> {
        let t = self.tables.lock().await;
        let mut open: Vec<_> = t.requests.values().filter(|r| r.is_open()).cloned().collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }

    async fn upsert_bank_transaction(
        &self,
        tx: NewBankTransaction,
    ) -> Result<BankTransaction, DatabaseError> {
        let mut t = self.tables.lock().await;

        if let Some(id) = t.bank_tx_by_reference.get(&tx.reference).copied() {
            let existing = t
                .bank_transactions
                .get_mut(&id)
                .ok_or_else(|| DatabaseError::Decode(format!("dangling reference index {}", id)))?;
            if existing.is_pending() {
                existing.refpk = tx.refpk;
                existing.phone_orig = tx.phone_orig;
                existing.phone_dest = tx.phone_dest;
                existing.amount = tx.amount;
                existing.bank_orig = tx.bank_orig;
                existing.transaction_date = tx.transaction_date;
                existing.raw_data = tx.raw_data;
                existing.updated_at = Utc::now();
            }
            return Ok(existing.clone());
        }

        let row = tx.into_transaction();
        t.bank_tx_by_reference.insert(row.reference.clone(), row.id);
        t.bank_transactions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_cached_bank_transactions(
        &self,
        phone_orig: &str,
        since: NaiveDateTime,
    ) -> Result<Vec<BankTransaction>, DatabaseError> {
        let t = self.tables.lock().await;
        let mut rows: Vec<_> = t
            .bank_transactions
            .values()
            .filter(|tx| tx.phone_orig == phone_orig && tx.transaction_date >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        Ok(rows)
    }

    async fn find_bank_transaction(
        &self,
        id: Uuid,
    ) -> Result<Option<BankTransaction>, DatabaseError> {
        Ok(self.tables.lock().await.bank_transactions.get(&id).cloned())
    }

    async fn list_pending_bank_transactions(&self) -> Result<Vec<BankTransaction>, DatabaseError> {
        let t = self.tables.lock().await;
        let mut rows: Vec<_> = t
            .bank_transactions
            .values()
            .filter(|tx| tx.is_pending())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        Ok(rows)
    }

    async fn reserve_bank_transaction(
        &self,
        id: Uuid,
        request_id: Uuid,
        user_id: &str,
    ) -> Result<Reservation, DatabaseError> {
        let mut t = self.tables.lock().await;
        let tx = t
            .bank_transactions
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("bank_transaction", id))?;

        match tx.status {
            BankTxStatus::Pending => {
                tx.status = BankTxStatus::Matched;
                tx.matched_request_id = Some(request_id);
                tx.matched_user_id = Some(user_id.to_string());
                tx.updated_at = Utc::now();
                Ok(Reservation::Reserved {
                    transaction: tx.clone(),
                    resumed: false,
                })
            }
            _ if tx.matched_request_id == Some(request_id) => Ok(Reservation::Reserved {
                transaction: tx.clone(),
                resumed: true,
            }),
            _ => Ok(Reservation::Taken {
                holder: tx.matched_request_id,
            }),
        }
    }

    async fn release_reservation(
        &self,
        id: Uuid,
        request_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let mut t = self.tables.lock().await;
        let Some(tx) = t.bank_transactions.get_mut(&id) else {
            return Ok(false);
        };
        if tx.status != BankTxStatus::Matched || tx.matched_request_id != Some(request_id) {
            return Ok(false);
        }
        tx.status = BankTxStatus::Pending;
        tx.matched_request_id = None;
        tx.matched_user_id = None;
        tx.updated_at = Utc::now();
        Ok(true)
    }

    async fn settle(&self, command: SettleCommand) -> Result<SettleOutcome, DatabaseError> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();

        if let Some(existing) = t
            .wallet_transactions
            .get(&command.bank_transaction_id)
            .cloned()
        {
            let wallet = t
                .wallets
                .get(&existing.wallet_id)
                .cloned()
                .ok_or_else(|| DatabaseError::not_found("wallet", existing.wallet_id))?;
            return Ok(SettleOutcome::AlreadyCredited {
                wallet,
                wallet_transaction: existing,
            });
        }

        let request_status = t
            .requests
            .get(&command.recharge_request_id)
            .map(|r| r.status)
            .ok_or_else(|| DatabaseError::not_found("recharge_request", command.recharge_request_id))?;
        if !request_status.can_transition_to(RechargeStatus::Matched) {
            return Ok(SettleOutcome::RequestClosed {
                status: request_status,
            });
        }

        let wallet = t
            .wallets
            .get_mut(&command.wallet_id)
            .ok_or_else(|| DatabaseError::not_found("wallet", command.wallet_id))?;
        if !wallet.is_active() {
            return Ok(SettleOutcome::WalletSuspended);
        }
        wallet.balance_ves = &wallet.balance_ves + &command.amount_ves;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let wallet_transaction = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: command.wallet_id,
            user_id: command.user_id,
            recharge_request_id: command.recharge_request_id,
            bank_transaction_id: command.bank_transaction_id,
            amount_ves: command.amount_ves,
            reference: command.reference,
            created_at: now,
        };
        t.wallet_transactions
            .insert(command.bank_transaction_id, wallet_transaction.clone());

        if let Some(request) = t.requests.get_mut(&command.recharge_request_id) {
            request.status = RechargeStatus::Matched;
            request.failure_reason = None;
            request.bank_transaction_id = Some(command.bank_transaction_id);
            request.updated_at = now;
        }

        if let Some(admin_id) = command.admin_id {
            t.audit.push(AuditEntry {
                id: Uuid::new_v4(),
                admin_id,
                bank_transaction_id: command.bank_transaction_id,
                recharge_request_id: command.recharge_request_id,
                timestamp: now,
            });
        }

        Ok(SettleOutcome::Credited {
            wallet,
            wallet_transaction,
        })
    }

    async fn finalize_bank_transaction(
        &self,
        id: Uuid,
        wallet_transaction_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let mut t = self.tables.lock().await;
        let tx = t
            .bank_transactions
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("bank_transaction", id))?;

        match tx.status {
            BankTxStatus::Matched => {
                tx.status = BankTxStatus::Verified;
                tx.matched_wallet_transaction_id = Some(wallet_transaction_id);
                tx.updated_at = Utc::now();
                Ok(())
            }
            BankTxStatus::Verified if tx.matched_wallet_transaction_id == Some(wallet_transaction_id) => {
                Ok(())
            }
            other => Err(DatabaseError::Conflict(format!(
                "bank transaction {} is {}, expected matched",
                id,
                other.as_str()
            ))),
        }
    }

    async fn list_audit_entries(&self) -> Result<Vec<AuditEntry>, DatabaseError> {
        let t = self.tables.lock().await;
        let mut entries = t.audit.clone();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}
