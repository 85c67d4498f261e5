//! Recharge request lifecycle
//!
//! `pending -> matched | failed | expired`. Transient failures (bank,
//! credentials, database) leave the request pending so the same request can
//! be resolved again.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::matcher::{Claim, MatchOutcome, ReferenceMatcher};
use super::transaction_ledger::TransactionLedger;
use super::validation;
use super::wallet_ledger::{CreditCommand, CreditReceipt, WalletLedger};
use crate::bank::BankClient;
use crate::config::AppConfig;
use crate::database::models::{
    BankTransaction, FailureReason, NewRechargeRequest, RechargeRequest, RechargeStatus,
};
use crate::database::ReconciliationStore;
use crate::error::{AppError, DomainError, ErrorCode};
use crate::logging::mask_phone;

#[derive(Debug, Clone)]
pub struct RechargeSettings {
    pub search_window_days: u32,
    pub amount_tolerance: BigDecimal,
    pub request_ttl: Duration,
    /// Offset of the partner's calendar from UTC
    pub utc_offset_hours: i32,
}

impl RechargeSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ::config::ConfigError> {
        Ok(Self {
            search_window_days: config.recharge.search_window_days,
            amount_tolerance: config.recharge.tolerance()?,
            request_ttl: Duration::hours(config.recharge.request_ttl_hours),
            utc_offset_hours: config.bank.utc_offset_hours,
        })
    }

    /// Current date at the partner bank
    pub fn today(&self) -> NaiveDate {
        (Utc::now() + Duration::hours(i64::from(self.utc_offset_hours)))
            .naive_utc()
            .date()
    }
}

/// A user's claim that they paid
#[derive(Debug, Clone)]
pub struct RechargeClaim {
    pub user_id: String,
    pub phone: String,
    pub amount: BigDecimal,
    pub bank: String,
    pub last_four: String,
}

#[derive(Debug, Clone)]
pub struct RechargeOutcome {
    pub request: RechargeRequest,
    pub receipt: CreditReceipt,
}

pub struct RechargeService {
    store: Arc<dyn ReconciliationStore>,
    ledger: Arc<TransactionLedger>,
    matcher: ReferenceMatcher,
    wallets: Arc<WalletLedger>,
    bank: Arc<BankClient>,
    settings: RechargeSettings,
}

impl RechargeService {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        bank: Arc<BankClient>,
        wallets: Arc<WalletLedger>,
        settings: RechargeSettings,
    ) -> Self {
        let ledger = Arc::new(TransactionLedger::new(store.clone()));
        let matcher = ReferenceMatcher::new(
            ledger.clone(),
            bank.clone(),
            settings.amount_tolerance.clone(),
            settings.search_window_days,
        );
        Self {
            store,
            ledger,
            matcher,
            wallets,
            bank,
            settings,
        }
    }

    pub fn settings(&self) -> &RechargeSettings {
        &self.settings
    }

    /// Validate a claim and persist it as a pending request
    #[instrument(skip(self, claim), fields(user_id = %claim.user_id, bank = %claim.bank))]
    pub async fn create(&self, claim: RechargeClaim) -> Result<RechargeRequest, AppError> {
        validation::require("userId", &claim.user_id)?;
        let last_four = validation::validate_last_four(&claim.last_four)?;
        validation::validate_amount(&claim.amount)?;
        let bank = validation::validate_bank(&claim.bank)?;
        let phone = validation::normalize_phone(&claim.phone)?;

        let wallet = self.store.get_or_create_wallet(&claim.user_id).await?;
        let request = self
            .store
            .insert_recharge_request(NewRechargeRequest {
                wallet_id: wallet.id,
                user_id: claim.user_id,
                claimed_phone: phone,
                claimed_amount_ves: claim.amount,
                claimed_bank: bank,
                claimed_last_four: last_four,
                expires_at: Utc::now() + self.settings.request_ttl,
            })
            .await?;

        info!(
            request_id = %request.id,
            phone = %mask_phone(&request.claimed_phone),
            amount_ves = %request.claimed_amount_ves,
            "Recharge request created"
        );
        Ok(request)
    }

    /// Match a pending request against the bank and credit the wallet
    #[instrument(skip(self))]
    pub async fn resolve(&self, request_id: Uuid) -> Result<RechargeOutcome, AppError> {
        let request = self.get(request_id).await?;

        match request.status {
            RechargeStatus::Pending => {}
            RechargeStatus::Matched => {
                info!("Request already matched, returning stored outcome");
                let receipt = self.wallets.receipt_for(&request).await?;
                return Ok(RechargeOutcome { request, receipt });
            }
            RechargeStatus::Failed => return Err(self.stored_failure(&request)),
            RechargeStatus::Expired => {
                return Err(AppError::domain(DomainError::InvalidStateTransition {
                    request_id: request.id.to_string(),
                    from: RechargeStatus::Expired.as_str().to_string(),
                    to: RechargeStatus::Matched.as_str().to_string(),
                }));
            }
        }

        let claim = Claim {
            phone: request.claimed_phone.clone(),
            bank: request.claimed_bank.clone(),
            last_four: request.claimed_last_four.clone(),
            amount: request.claimed_amount_ves.clone(),
            request_id: Some(request.id),
        };

        let bank_tx = match self.matcher.find(&claim, self.settings.today()).await? {
            MatchOutcome::Found(tx) => tx,
            MatchOutcome::NotFound => {
                self.fail(&request, FailureReason::NotFound).await?;
                return Err(AppError::domain(DomainError::PaymentNotFound {
                    last_four: request.claimed_last_four.clone(),
                    window_days: self.settings.search_window_days,
                }));
            }
            MatchOutcome::BankMismatch(tx) => {
                self.fail(&request, FailureReason::BankMismatch).await?;
                return Err(AppError::domain(DomainError::BankMismatch {
                    claimed_bank: request.claimed_bank.clone(),
                    reported_bank: Some(tx.bank_orig),
                    reference: Some(tx.reference),
                }));
            }
        };

        let credited = self
            .wallets
            .credit(CreditCommand {
                bank_transaction: bank_tx,
                request: request.clone(),
                admin_id: None,
            })
            .await;

        let receipt = match credited {
            Ok(receipt) => receipt,
            Err(err) => {
                match err.error_code() {
                    ErrorCode::AlreadyMatched => {
                        self.fail(&request, FailureReason::AlreadyMatched).await?;
                    }
                    ErrorCode::WalletSuspended => {
                        self.fail(&request, FailureReason::WalletSuspended).await?;
                    }
                    _ => {}
                }
                return Err(err);
            }
        };

        let request = self.get(request_id).await?;
        Ok(RechargeOutcome { request, receipt })
    }

    /// Create a request and resolve it in one call
    pub async fn claim_and_resolve(&self, claim: RechargeClaim) -> Result<RechargeOutcome, AppError> {
        let request = self.create(claim).await?;
        self.resolve(request.id).await
    }

    /// Find the payment a claim refers to without crediting anything
    #[instrument(skip(self, claim), fields(user_id = %claim.user_id, bank = %claim.bank))]
    pub async fn verify(&self, claim: RechargeClaim) -> Result<BankTransaction, AppError> {
        let last_four = validation::validate_last_four(&claim.last_four)?;
        validation::validate_amount(&claim.amount)?;
        let bank = validation::validate_bank(&claim.bank)?;
        let phone = validation::normalize_phone(&claim.phone)?;

        let matcher_claim = Claim {
            phone,
            bank: bank.clone(),
            last_four: last_four.clone(),
            amount: claim.amount,
            request_id: None,
        };

        match self.matcher.find(&matcher_claim, self.settings.today()).await? {
            MatchOutcome::Found(tx) => Ok(tx),
            MatchOutcome::BankMismatch(tx) => Err(AppError::domain(DomainError::BankMismatch {
                claimed_bank: bank,
                reported_bank: Some(tx.bank_orig),
                reference: Some(tx.reference),
            })),
            MatchOutcome::NotFound => Err(AppError::domain(DomainError::PaymentNotFound {
                last_four,
                window_days: self.settings.search_window_days,
            })),
        }
    }

    /// Query the partner for one day and mirror the result locally
    #[instrument(skip(self, phone), fields(phone = %mask_phone(phone)))]
    pub async fn find_payments(
        &self,
        phone: &str,
        bank: &str,
        date: NaiveDate,
    ) -> Result<Vec<BankTransaction>, AppError> {
        let phone = validation::normalize_phone(phone)?;
        let bank = validation::validate_bank(bank)?;

        let payments = self.bank.search_payments(&phone, &bank, date).await?;
        let stored = self.ledger.record_payments(payments).await?;
        Ok(stored)
    }

    pub async fn get(&self, request_id: Uuid) -> Result<RechargeRequest, AppError> {
        self.store
            .find_recharge_request(request_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::RechargeRequestNotFound {
                    request_id: request_id.to_string(),
                })
            })
    }

    /// Move pending requests past their deadline to expired
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(self.store.expire_stale_requests(now).await?)
    }

    async fn fail(&self, request: &RechargeRequest, reason: FailureReason) -> Result<(), AppError> {
        match self.store.mark_request_failed(request.id, reason).await? {
            Some(_) => info!(request_id = %request.id, reason = reason.as_str(), "Recharge request failed"),
            None => warn!(
                request_id = %request.id,
                reason = reason.as_str(),
                "Request left pending before it could be marked failed"
            ),
        }
        Ok(())
    }

    /// Re-raise the failure a request was closed with
    fn stored_failure(&self, request: &RechargeRequest) -> AppError {
        match request.failure_reason {
            Some(FailureReason::BankMismatch) => AppError::domain(DomainError::BankMismatch {
                claimed_bank: request.claimed_bank.clone(),
                reported_bank: None,
                reference: None,
            }),
            Some(FailureReason::WalletSuspended) => AppError::domain(DomainError::WalletSuspended {
                wallet_id: request.wallet_id.to_string(),
            }),
            Some(FailureReason::AlreadyMatched) => {
                AppError::domain(DomainError::AlreadyMatched { reference: None })
            }
            Some(FailureReason::NotFound) | None => AppError::domain(DomainError::PaymentNotFound {
                last_four: request.claimed_last_four.clone(),
                window_days: self.settings.search_window_days,
            }),
        }
    }
}
