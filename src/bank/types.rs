//! Partner bank wire types
//!
//! Movement responses are decoded into a [`BankEnvelope`]: either the payments
//! list (application code 200) or a rejection carrying the partner's code.
//! Anything else, including a missing code, is an error.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tracing::warn;

use super::BankError;

/// Application-level success code used by every partner endpoint
pub const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    #[serde(rename = "Dni")]
    pub dni: &'a str,
    #[serde(rename = "Pass")]
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "Code")]
    pub code: Option<i64>,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MobileFindRequest<'a> {
    #[serde(rename = "Phone")]
    pub phone: &'a str,
    #[serde(rename = "Bank")]
    pub bank: &'a str,
    #[serde(rename = "Date")]
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRequest {
    #[serde(rename = "Date")]
    pub date: String,
}

/// One movement as the partner reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMovement {
    #[serde(rename = "ID", default)]
    pub id: Option<JsonValue>,
    #[serde(rename = "NroReferencia")]
    pub reference: String,
    #[serde(rename = "NroReferenciaCorto", default)]
    pub short_reference: Option<String>,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PhoneOrig", default)]
    pub phone_orig: String,
    #[serde(rename = "PhoneDest", default)]
    pub phone_dest: String,
    #[serde(rename = "BancoOrig", default)]
    pub bank_orig: String,
    #[serde(rename = "FechaMovimiento")]
    pub movement_date: String,
    #[serde(rename = "HoraMovimiento", default)]
    pub movement_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "Code")]
    code: Option<i64>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "lista", default)]
    movements: Vec<JsonValue>,
}

/// A validated payment reported by the partner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankPayment {
    pub reference: String,
    pub refpk: Option<String>,
    pub short_reference: Option<String>,
    pub amount: BigDecimal,
    pub phone_orig: String,
    pub phone_dest: String,
    pub bank_orig: String,
    pub transaction_date: NaiveDateTime,
    pub raw_data: JsonValue,
}

impl BankPayment {
    pub fn from_raw(raw: RawMovement, raw_data: JsonValue) -> Result<Self, BankError> {
        let amount = BigDecimal::from_str(raw.amount.trim()).map_err(|e| {
            BankError::Malformed(format!("amount '{}' for {}: {}", raw.amount, raw.reference, e))
        })?;

        let date = NaiveDate::parse_from_str(raw.movement_date.trim(), "%Y-%m-%d").map_err(|e| {
            BankError::Malformed(format!(
                "date '{}' for {}: {}",
                raw.movement_date, raw.reference, e
            ))
        })?;

        let time = raw
            .movement_time
            .as_deref()
            .and_then(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M:%S").ok())
            .unwrap_or(NaiveTime::MIN);

        let refpk = raw.id.as_ref().and_then(|v| match v {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        });

        if raw.reference.trim().is_empty() {
            return Err(BankError::Malformed("movement without reference".to_string()));
        }

        Ok(Self {
            reference: raw.reference.trim().to_string(),
            refpk,
            short_reference: raw.short_reference,
            amount,
            phone_orig: raw.phone_orig,
            phone_dest: raw.phone_dest,
            bank_orig: raw.bank_orig,
            transaction_date: date.and_time(time),
            raw_data,
        })
    }

    /// Trailing 4 characters of the long reference
    pub fn last_four(&self) -> &str {
        last_four(&self.reference)
    }
}

pub fn last_four(reference: &str) -> &str {
    let start = reference
        .char_indices()
        .rev()
        .nth(3)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &reference[start..]
}

/// Strict decoding result of a movements response
#[derive(Debug, Clone, PartialEq)]
pub enum BankEnvelope {
    Ok(Vec<BankPayment>),
    Rejected { code: i64, message: String },
}

impl BankEnvelope {
    /// Decode a movements body; malformed individual movements are skipped
    pub fn parse(body: &str) -> Result<Self, BankError> {
        let envelope: RawEnvelope = serde_json::from_str(body)
            .map_err(|e| BankError::Malformed(format!("invalid movements body: {}", e)))?;

        let code = envelope
            .code
            .ok_or_else(|| BankError::Malformed("response without Code".to_string()))?;

        if code != SUCCESS_CODE {
            return Ok(BankEnvelope::Rejected {
                code,
                message: envelope.message.unwrap_or_default(),
            });
        }

        let mut payments = Vec::with_capacity(envelope.movements.len());
        for value in envelope.movements {
            let parsed = serde_json::from_value::<RawMovement>(value.clone())
                .map_err(|e| BankError::Malformed(e.to_string()))
                .and_then(|raw| BankPayment::from_raw(raw, value));

            match parsed {
                Ok(payment) => payments.push(payment),
                Err(e) => warn!(error = %e, "Skipping malformed movement"),
            }
        }

        payments.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        Ok(BankEnvelope::Ok(payments))
    }

    pub fn into_result(self) -> Result<Vec<BankPayment>, BankError> {
        match self {
            BankEnvelope::Ok(payments) => Ok(payments),
            BankEnvelope::Rejected { code, message } => Err(BankError::Rejected { code, message }),
        }
    }
}
