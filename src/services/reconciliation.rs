//! Manual reconciliation
//!
//! Operators pair an unconsumed bank transaction with an open recharge
//! request. The credit goes through the same [`WalletLedger`] path as the
//! automatic flow, with an audit entry written in the same atomic unit.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::wallet_ledger::{CreditCommand, CreditReceipt, WalletLedger};
use crate::database::models::{AuditEntry, BankTransaction, RechargeRequest, Wallet, WalletStatus};
use crate::database::ReconciliationStore;
use crate::error::{AppError, DomainError, ValidationError};

/// Unconsumed payments and open requests, side by side
#[derive(Debug, Clone, Serialize)]
pub struct PendingItems {
    pub bank_transactions: Vec<BankTransaction>,
    pub recharge_requests: Vec<RechargeRequest>,
}

pub struct ReconciliationService {
    store: Arc<dyn ReconciliationStore>,
    wallets: Arc<WalletLedger>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn ReconciliationStore>, wallets: Arc<WalletLedger>) -> Self {
        Self { store, wallets }
    }

    pub async fn pending_items(&self) -> Result<PendingItems, AppError> {
        Ok(PendingItems {
            bank_transactions: self.store.list_pending_bank_transactions().await?,
            recharge_requests: self.store.list_open_requests().await?,
        })
    }

    #[instrument(skip(self))]
    pub async fn manual_reconcile(
        &self,
        bank_transaction_id: Uuid,
        recharge_request_id: Uuid,
        admin_id: &str,
    ) -> Result<CreditReceipt, AppError> {
        if admin_id.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "adminId".to_string(),
            }));
        }

        let bank_transaction = self
            .store
            .find_bank_transaction(bank_transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::BankTransactionNotFound {
                    bank_transaction_id: bank_transaction_id.to_string(),
                })
            })?;

        let request = self
            .store
            .find_recharge_request(recharge_request_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::RechargeRequestNotFound {
                    request_id: recharge_request_id.to_string(),
                })
            })?;

        let receipt = self
            .wallets
            .credit(CreditCommand {
                bank_transaction,
                request,
                admin_id: Some(admin_id.to_string()),
            })
            .await?;

        info!(
            admin_id = %admin_id,
            wallet_tx_id = %receipt.wallet_transaction.id,
            replayed = receipt.replayed,
            "Manual reconciliation applied"
        );
        Ok(receipt)
    }

    pub async fn audit_trail(&self) -> Result<Vec<AuditEntry>, AppError> {
        Ok(self.store.list_audit_entries().await?)
    }

    #[instrument(skip(self))]
    pub async fn set_wallet_status(
        &self,
        wallet_id: Uuid,
        status: WalletStatus,
    ) -> Result<Wallet, AppError> {
        let wallet = self.store.set_wallet_status(wallet_id, status).await?;
        info!(wallet_id = %wallet.id, status = status.as_str(), "Wallet status changed");
        Ok(wallet)
    }
}
