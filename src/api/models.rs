use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::models::{BankTransaction, BankTxStatus, Wallet, WalletStatus};
use crate::services::{CreditReceipt, RechargeClaim};

/// Accept amounts as JSON numbers or strings without going through f64
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Number(serde_json::Number),
        Text(String),
    }

    let text = match RawAmount::deserialize(deserializer)? {
        RawAmount::Number(n) => n.to_string(),
        RawAmount::Text(s) => s,
    };
    BigDecimal::from_str(text.trim())
        .map_err(|e| serde::de::Error::custom(format!("invalid amount '{}': {}", text, e)))
}

// ============================================================================
// Requests
// ============================================================================

/// POST /wallet-recharge
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRechargeRequest {
    pub user_id: String,
    pub user_phone: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: BigDecimal,
    pub banco_orig: String,
    pub last_four_digits: String,
}

impl From<WalletRechargeRequest> for RechargeClaim {
    fn from(body: WalletRechargeRequest) -> Self {
        RechargeClaim {
            user_id: body.user_id,
            phone: body.user_phone,
            amount: body.amount,
            bank: body.banco_orig,
            last_four: body.last_four_digits,
        }
    }
}

/// POST /bancamiga-find-payment
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindPaymentRequest {
    pub phone_orig: String,
    pub bank_orig: String,
    pub date: String,
}

/// POST /bancamiga-verify-payment
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub user_id: String,
    pub user_phone: String,
    pub banco_orig: String,
    pub last_four_digits: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub expected_amount: BigDecimal,
}

impl From<VerifyPaymentRequest> for RechargeClaim {
    fn from(body: VerifyPaymentRequest) -> Self {
        RechargeClaim {
            user_id: body.user_id,
            phone: body.user_phone,
            amount: body.expected_amount,
            bank: body.banco_orig,
            last_four: body.last_four_digits,
        }
    }
}

/// POST /admin/reconciliation/manual
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualReconcileRequest {
    pub bank_transaction_id: Uuid,
    pub recharge_request_id: Uuid,
    pub admin_id: String,
}

/// PUT /admin/wallets/{id}/status
#[derive(Debug, Deserialize)]
pub struct WalletStatusRequest {
    pub status: WalletStatus,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct WalletBalance {
    pub balance_ves: BigDecimal,
    pub balance_usd: BigDecimal,
}

impl From<&Wallet> for WalletBalance {
    fn from(wallet: &Wallet) -> Self {
        Self {
            balance_ves: wallet.balance_ves.clone(),
            balance_usd: wallet.balance_usd.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreditedTransaction {
    pub amount: BigDecimal,
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct RechargeResponse {
    pub success: bool,
    pub recharge_request_id: Uuid,
    pub wallet: WalletBalance,
    pub transaction: CreditedTransaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl RechargeResponse {
    pub fn from_receipt(recharge_request_id: Uuid, receipt: &CreditReceipt) -> Self {
        Self {
            success: true,
            recharge_request_id,
            wallet: WalletBalance::from(&receipt.wallet),
            transaction: CreditedTransaction {
                amount: receipt.wallet_transaction.amount_ves.clone(),
                reference: receipt.wallet_transaction.reference.clone(),
            },
            warning: receipt.warning.as_ref().map(|w| w.message.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: Uuid,
    pub reference: String,
    pub amount: BigDecimal,
    pub phone_orig: String,
    pub phone_dest: String,
    pub bank_orig: String,
    pub transaction_date: NaiveDateTime,
    pub status: BankTxStatus,
    pub raw: JsonValue,
}

impl From<BankTransaction> for PaymentView {
    fn from(tx: BankTransaction) -> Self {
        Self {
            id: tx.id,
            reference: tx.reference,
            amount: tx.amount,
            phone_orig: tx.phone_orig,
            phone_dest: tx.phone_dest,
            bank_orig: tx.bank_orig,
            transaction_date: tx.transaction_date,
            status: tx.status,
            raw: tx.raw_data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FindPaymentResponse {
    pub success: bool,
    pub count: usize,
    pub payments: Vec<PaymentView>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub payment: PaymentView,
}
