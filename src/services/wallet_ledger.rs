//! Wallet crediting
//!
//! [`WalletLedger::credit`] is the only way money enters a wallet. It runs in
//! three steps:
//!
//! 1. reserve the bank transaction for the request (`pending -> matched`)
//! 2. settle atomically: balance, wallet transaction, request, audit entry
//! 3. finalize the bank transaction (`matched -> verified`)
//!
//! A failure in step 3 leaves the credit in place and is reported as a
//! [`PersistenceWarning`]; resolving the request again repairs the link.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::database::models::{
    BankTransaction, BankTxStatus, RechargeRequest, RechargeStatus, Wallet, WalletTransaction,
};
use crate::database::{ReconciliationStore, Reservation, SettleCommand, SettleOutcome};
use crate::error::{AppError, DomainError};
use crate::log_transaction;

/// The credit committed but the bank transaction could not be finalized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistenceWarning {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CreditCommand {
    pub bank_transaction: BankTransaction,
    pub request: RechargeRequest,
    /// Operator performing a manual reconciliation
    pub admin_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreditReceipt {
    pub wallet: Wallet,
    pub wallet_transaction: WalletTransaction,
    /// The credit already existed; nothing new was added
    pub replayed: bool,
    pub warning: Option<PersistenceWarning>,
}

pub struct WalletLedger {
    store: Arc<dyn ReconciliationStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn ReconciliationStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, command), fields(
        request_id = %command.request.id,
        bank_tx_id = %command.bank_transaction.id,
        reference = %command.bank_transaction.reference,
        manual = command.admin_id.is_some(),
    ))]
    pub async fn credit(&self, command: CreditCommand) -> Result<CreditReceipt, AppError> {
        let CreditCommand {
            bank_transaction,
            request,
            admin_id,
        } = command;

        // Step 1: reserve
        let reservation = self
            .store
            .reserve_bank_transaction(bank_transaction.id, request.id, &request.user_id)
            .await?;

        let reserved = match reservation {
            Reservation::Reserved {
                transaction,
                resumed,
            } => {
                if resumed {
                    info!("Resuming credit for a reservation this request already holds");
                }
                transaction
            }
            Reservation::Taken { holder } => {
                warn!(holder = ?holder, "Bank transaction already consumed by another request");
                return Err(AppError::domain(DomainError::AlreadyMatched {
                    reference: Some(bank_transaction.reference),
                }));
            }
        };

        // Step 2: settle
        let settle = SettleCommand {
            bank_transaction_id: reserved.id,
            recharge_request_id: request.id,
            wallet_id: request.wallet_id,
            user_id: request.user_id.clone(),
            amount_ves: reserved.amount.clone(),
            reference: reserved.reference.clone(),
            admin_id: admin_id.clone(),
        };

        let (wallet, wallet_transaction, replayed) = match self.store.settle(settle).await? {
            SettleOutcome::Credited {
                wallet,
                wallet_transaction,
            } => (wallet, wallet_transaction, false),
            SettleOutcome::AlreadyCredited {
                wallet,
                wallet_transaction,
            } => (wallet, wallet_transaction, true),
            SettleOutcome::WalletSuspended => {
                self.release(&reserved, request.id).await;
                return Err(AppError::domain(DomainError::WalletSuspended {
                    wallet_id: request.wallet_id.to_string(),
                }));
            }
            SettleOutcome::RequestClosed { status } => {
                // A concurrent retry of this request may have settled first
                if status == RechargeStatus::Matched {
                    if let Some(current) = self.store.find_recharge_request(request.id).await? {
                        if current.bank_transaction_id == Some(reserved.id) {
                            info!("Request settled by a concurrent resolution, replaying its credit");
                            return self.receipt_for(&current).await;
                        }
                    }
                }
                self.release(&reserved, request.id).await;
                return Err(AppError::domain(DomainError::InvalidStateTransition {
                    request_id: request.id.to_string(),
                    from: status.as_str().to_string(),
                    to: "matched".to_string(),
                }));
            }
        };

        if !replayed {
            log_transaction!(
                event = "wallet_credit",
                request_id = request.id,
                wallet_id = wallet.id,
                reference = reserved.reference,
                amount_ves = wallet_transaction.amount_ves,
                admin_id = admin_id.as_deref().unwrap_or("-"),
            );
        }

        // Step 3: finalize
        let warning = self.finalize(&reserved, &wallet_transaction).await;

        Ok(CreditReceipt {
            wallet,
            wallet_transaction,
            replayed,
            warning,
        })
    }

    /// Outcome of a request that is already matched, repairing an unfinished finalize
    #[instrument(skip(self, request), fields(request_id = %request.id))]
    pub async fn receipt_for(&self, request: &RechargeRequest) -> Result<CreditReceipt, AppError> {
        let bank_tx_id = request.bank_transaction_id.ok_or_else(|| {
            AppError::database(format!("matched request {} has no bank transaction", request.id))
        })?;

        let wallet_transaction = self
            .store
            .find_wallet_transaction_by_bank_tx(bank_tx_id)
            .await?
            .ok_or_else(|| {
                AppError::database(format!("no wallet transaction for bank transaction {}", bank_tx_id))
            })?;

        let wallet = self
            .store
            .find_wallet(wallet_transaction.wallet_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::WalletNotFound {
                    wallet_id: wallet_transaction.wallet_id.to_string(),
                })
            })?;

        let mut warning = None;
        if let Some(bank_tx) = self.store.find_bank_transaction(bank_tx_id).await? {
            if bank_tx.status == BankTxStatus::Matched {
                info!(bank_tx_id = %bank_tx_id, "Repairing unfinished bank transaction link");
                warning = self.finalize(&bank_tx, &wallet_transaction).await;
            }
        }

        Ok(CreditReceipt {
            wallet,
            wallet_transaction,
            replayed: true,
            warning,
        })
    }

    async fn finalize(
        &self,
        bank_tx: &BankTransaction,
        wallet_transaction: &WalletTransaction,
    ) -> Option<PersistenceWarning> {
        match self
            .store
            .finalize_bank_transaction(bank_tx.id, wallet_transaction.id)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                error!(
                    event_type = "persistence_warning",
                    bank_tx_id = %bank_tx.id,
                    wallet_tx_id = %wallet_transaction.id,
                    error = %e,
                    "Wallet credited but bank transaction could not be finalized"
                );
                Some(PersistenceWarning {
                    message: "Credit applied; ledger finalization is pending operator review"
                        .to_string(),
                })
            }
        }
    }

    async fn release(&self, bank_tx: &BankTransaction, request_id: Uuid) {
        match self.store.release_reservation(bank_tx.id, request_id).await {
            Ok(true) => info!(bank_tx_id = %bank_tx.id, "Reservation released"),
            Ok(false) => {}
            Err(e) => error!(
                bank_tx_id = %bank_tx.id,
                error = %e,
                "Failed to release reservation; bank transaction stays reserved"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewBankTransaction, NewRechargeRequest, WalletStatus};
    use crate::database::MemoryStore;
    use bigdecimal::BigDecimal;
    use chrono::{Duration, NaiveDate, Utc};
    use serde_json::json;
    use std::str::FromStr;

    async fn setup(store: &Arc<MemoryStore>, user: &str) -> (RechargeRequest, BankTransaction) {
        let wallet = store.get_or_create_wallet(user).await.unwrap();
        let request = store
            .insert_recharge_request(NewRechargeRequest {
                wallet_id: wallet.id,
                user_id: user.to_string(),
                claimed_phone: "04141234567".to_string(),
                claimed_amount_ves: BigDecimal::from(100),
                claimed_bank: "0172".to_string(),
                claimed_last_four: "4321".to_string(),
                expires_at: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();
        let tx = store
            .upsert_bank_transaction(NewBankTransaction {
                reference: format!("0000{}4321", user.len()),
                refpk: None,
                phone_orig: "04141234567".to_string(),
                phone_dest: "04241112233".to_string(),
                amount: BigDecimal::from_str("100.01").unwrap(),
                bank_orig: "0172".to_string(),
                transaction_date: NaiveDate::from_ymd_opt(2026, 10, 18)
                    .unwrap()
                    .and_hms_opt(10, 0, 0)
                    .unwrap(),
                raw_data: json!({}),
            })
            .await
            .unwrap();
        (request, tx)
    }

    #[tokio::test]
    async fn credits_the_reported_amount_and_verifies_the_payment() {
        let store = Arc::new(MemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let (request, tx) = setup(&store, "user-1").await;

        let receipt = ledger
            .credit(CreditCommand {
                bank_transaction: tx.clone(),
                request: request.clone(),
                admin_id: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.wallet.balance_ves, BigDecimal::from_str("100.01").unwrap());
        assert!(receipt.warning.is_none());
        assert!(!receipt.replayed);

        let stored = store.find_bank_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BankTxStatus::Verified);
        assert_eq!(stored.matched_wallet_transaction_id, Some(receipt.wallet_transaction.id));
    }

    #[tokio::test]
    async fn suspended_wallet_releases_the_reservation() {
        let store = Arc::new(MemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let (request, tx) = setup(&store, "user-1").await;
        store
            .set_wallet_status(request.wallet_id, WalletStatus::Suspended)
            .await
            .unwrap();

        let err = ledger
            .credit(CreditCommand {
                bank_transaction: tx.clone(),
                request,
                admin_id: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 403);
        let stored = store.find_bank_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BankTxStatus::Pending);
        assert!(stored.matched_request_id.is_none());
    }

    #[tokio::test]
    async fn second_request_gets_already_matched() {
        let store = Arc::new(MemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let (first, tx) = setup(&store, "user-1").await;
        let (second, _) = setup(&store, "user-1").await;

        ledger
            .credit(CreditCommand {
                bank_transaction: tx.clone(),
                request: first,
                admin_id: None,
            })
            .await
            .unwrap();

        let err = ledger
            .credit(CreditCommand {
                bank_transaction: tx,
                request: second,
                admin_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }
}
