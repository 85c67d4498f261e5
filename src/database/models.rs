//! Persistent entities of the reconciliation engine
//!
//! Status enums are stored as lowercase text and round-trip through
//! `as_str` / `FromStr`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::bank::types::{last_four, BankPayment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

// ============================================================================
// Wallet
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Suspended,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for WalletStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WalletStatus::Active),
            "suspended" => Ok(WalletStatus::Suspended),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: String,
    pub balance_ves: BigDecimal,
    pub balance_usd: BigDecimal,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            balance_ves: BigDecimal::from(0),
            balance_usd: BigDecimal::from(0),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: String,
    pub recharge_request_id: Uuid,
    pub bank_transaction_id: Uuid,
    pub amount_ves: BigDecimal,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Recharge requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RechargeStatus {
    Pending,
    Matched,
    Failed,
    Expired,
}

impl RechargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RechargeStatus::Pending => "pending",
            RechargeStatus::Matched => "matched",
            RechargeStatus::Failed => "failed",
            RechargeStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RechargeStatus::Matched | RechargeStatus::Failed)
    }

    /// Expired requests can still be matched, but only by an operator
    pub fn can_transition_to(&self, next: RechargeStatus) -> bool {
        matches!(
            (self, next),
            (RechargeStatus::Pending, RechargeStatus::Matched)
                | (RechargeStatus::Pending, RechargeStatus::Failed)
                | (RechargeStatus::Pending, RechargeStatus::Expired)
                | (RechargeStatus::Expired, RechargeStatus::Matched)
        )
    }
}

impl FromStr for RechargeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RechargeStatus::Pending),
            "matched" => Ok(RechargeStatus::Matched),
            "failed" => Ok(RechargeStatus::Failed),
            "expired" => Ok(RechargeStatus::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Nothing in the window yet; the user may submit a new claim later
    NotFound,
    BankMismatch,
    WalletSuspended,
    AlreadyMatched,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NotFound => "not_found",
            FailureReason::BankMismatch => "bank_mismatch",
            FailureReason::WalletSuspended => "wallet_suspended",
            FailureReason::AlreadyMatched => "already_matched",
        }
    }
}

impl FromStr for FailureReason {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(FailureReason::NotFound),
            "bank_mismatch" => Ok(FailureReason::BankMismatch),
            "wallet_suspended" => Ok(FailureReason::WalletSuspended),
            "already_matched" => Ok(FailureReason::AlreadyMatched),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RechargeRequest {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: String,
    pub claimed_phone: String,
    pub claimed_amount_ves: BigDecimal,
    pub claimed_bank: String,
    pub claimed_last_four: String,
    pub status: RechargeStatus,
    pub failure_reason: Option<FailureReason>,
    pub bank_transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RechargeRequest {
    /// Still eligible for a credit (pending, or expired on the manual path)
    pub fn is_open(&self) -> bool {
        matches!(self.status, RechargeStatus::Pending | RechargeStatus::Expired)
    }
}

#[derive(Debug, Clone)]
pub struct NewRechargeRequest {
    pub wallet_id: Uuid,
    pub user_id: String,
    pub claimed_phone: String,
    pub claimed_amount_ves: BigDecimal,
    pub claimed_bank: String,
    pub claimed_last_four: String,
    pub expires_at: DateTime<Utc>,
}

impl NewRechargeRequest {
    pub fn into_request(self) -> RechargeRequest {
        let now = Utc::now();
        RechargeRequest {
            id: Uuid::new_v4(),
            wallet_id: self.wallet_id,
            user_id: self.user_id,
            claimed_phone: self.claimed_phone,
            claimed_amount_ves: self.claimed_amount_ves,
            claimed_bank: self.claimed_bank,
            claimed_last_four: self.claimed_last_four,
            status: RechargeStatus::Pending,
            failure_reason: None,
            bank_transaction_id: None,
            created_at: now,
            expires_at: self.expires_at,
            updated_at: now,
        }
    }
}

// ============================================================================
// Bank transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankTxStatus {
    /// Not consumed by any request
    Pending,
    /// Reserved by a request
    Matched,
    /// Credit committed and linked to its wallet transaction
    Verified,
}

impl BankTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankTxStatus::Pending => "pending",
            BankTxStatus::Matched => "matched",
            BankTxStatus::Verified => "verified",
        }
    }
}

impl FromStr for BankTxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BankTxStatus::Pending),
            "matched" => Ok(BankTxStatus::Matched),
            "verified" => Ok(BankTxStatus::Verified),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankTransaction {
    pub id: Uuid,
    pub reference: String,
    pub refpk: Option<String>,
    pub phone_orig: String,
    pub phone_dest: String,
    pub amount: BigDecimal,
    pub bank_orig: String,
    pub transaction_date: NaiveDateTime,
    pub status: BankTxStatus,
    pub matched_user_id: Option<String>,
    pub matched_request_id: Option<Uuid>,
    pub matched_wallet_transaction_id: Option<Uuid>,
    pub raw_data: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankTransaction {
    pub fn last_four(&self) -> &str {
        last_four(&self.reference)
    }

    pub fn is_pending(&self) -> bool {
        self.status == BankTxStatus::Pending
    }
}

/// A partner-reported payment about to be upserted
#[derive(Debug, Clone)]
pub struct NewBankTransaction {
    pub reference: String,
    pub refpk: Option<String>,
    pub phone_orig: String,
    pub phone_dest: String,
    pub amount: BigDecimal,
    pub bank_orig: String,
    pub transaction_date: NaiveDateTime,
    pub raw_data: JsonValue,
}

impl From<BankPayment> for NewBankTransaction {
    fn from(payment: BankPayment) -> Self {
        Self {
            reference: payment.reference,
            refpk: payment.refpk,
            phone_orig: payment.phone_orig,
            phone_dest: payment.phone_dest,
            amount: payment.amount,
            bank_orig: payment.bank_orig,
            transaction_date: payment.transaction_date,
            raw_data: payment.raw_data,
        }
    }
}

impl NewBankTransaction {
    pub fn into_transaction(self) -> BankTransaction {
        let now = Utc::now();
        BankTransaction {
            id: Uuid::new_v4(),
            reference: self.reference,
            refpk: self.refpk,
            phone_orig: self.phone_orig,
            phone_dest: self.phone_dest,
            amount: self.amount,
            bank_orig: self.bank_orig,
            transaction_date: self.transaction_date,
            status: BankTxStatus::Pending,
            matched_user_id: None,
            matched_request_id: None,
            matched_wallet_transaction_id: None,
            raw_data: self.raw_data,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub admin_id: String,
    pub bank_transaction_id: Uuid,
    pub recharge_request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}
