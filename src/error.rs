//! Application error taxonomy
//!
//! Every failure that can cross the HTTP boundary is an [`AppError`]. The kind
//! decides the status code, the stable machine-readable code, the message the
//! wallet UI shows and whether the caller may retry the whole resolution.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Stable error codes returned to API consumers
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    BankMismatch,
    PaymentNotFound,
    WalletSuspended,
    AlreadyMatched,
    RechargeRequestNotFound,
    BankTransactionNotFound,
    WalletNotFound,
    InvalidStateTransition,
    CredentialError,
    BankApiError,
    DatabaseError,
    InternalError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidLastFour { value: String },
    InvalidAmount { amount: String, reason: String },
    UnknownBank { code: String },
    InvalidPhone { value: String },
    InvalidDate { value: String },
    MissingField { field: String },
    MalformedBody { reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLastFour { value } => {
                write!(f, "last four digits must be exactly 4 digits, got '{}'", value)
            }
            Self::InvalidAmount { amount, reason } => {
                write!(f, "invalid amount {}: {}", amount, reason)
            }
            Self::UnknownBank { code } => write!(f, "unknown bank code '{}'", code),
            Self::InvalidPhone { value } => write!(f, "invalid mobile phone '{}'", value),
            Self::InvalidDate { value } => write!(f, "invalid date '{}', expected YYYY-MM-DD", value),
            Self::MissingField { field } => write!(f, "missing field '{}'", field),
            Self::MalformedBody { reason } => write!(f, "malformed request: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// `reported_bank` and `reference` are unknown when replaying a stored failure
    BankMismatch {
        claimed_bank: String,
        reported_bank: Option<String>,
        reference: Option<String>,
    },
    PaymentNotFound {
        last_four: String,
        window_days: u32,
    },
    WalletSuspended {
        wallet_id: String,
    },
    AlreadyMatched {
        reference: Option<String>,
    },
    RechargeRequestNotFound {
        request_id: String,
    },
    BankTransactionNotFound {
        bank_transaction_id: String,
    },
    WalletNotFound {
        wallet_id: String,
    },
    InvalidStateTransition {
        request_id: String,
        from: String,
        to: String,
    },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BankMismatch {
                claimed_bank,
                reported_bank: Some(reported_bank),
                reference: Some(reference),
            } => write!(
                f,
                "payment {} was sent from bank {}, claim names bank {}",
                reference, reported_bank, claimed_bank
            ),
            Self::BankMismatch { claimed_bank, .. } => write!(
                f,
                "matching payment was sent from a bank other than {}",
                claimed_bank
            ),
            Self::PaymentNotFound {
                last_four,
                window_days,
            } => write!(
                f,
                "no payment ending in {} within the last {} days",
                last_four, window_days
            ),
            Self::WalletSuspended { wallet_id } => write!(f, "wallet {} is suspended", wallet_id),
            Self::AlreadyMatched {
                reference: Some(reference),
            } => write!(f, "payment {} was already credited", reference),
            Self::AlreadyMatched { reference: None } => {
                write!(f, "matching payment was already credited")
            }
            Self::RechargeRequestNotFound { request_id } => {
                write!(f, "recharge request {} not found", request_id)
            }
            Self::BankTransactionNotFound {
                bank_transaction_id,
            } => write!(f, "bank transaction {} not found", bank_transaction_id),
            Self::WalletNotFound { wallet_id } => write!(f, "wallet {} not found", wallet_id),
            Self::InvalidStateTransition {
                request_id,
                from,
                to,
            } => write!(
                f,
                "recharge request {} cannot move from {} to {}",
                request_id, from, to
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalError {
    Credential {
        message: String,
    },
    BankApi {
        message: String,
        code: Option<i64>,
        is_timeout: bool,
    },
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential { message } => write!(f, "bank credential error: {}", message),
            Self::BankApi { message, code, .. } => match code {
                Some(code) => write!(f, "bank api error (code {}): {}", code, message),
                None => write!(f, "bank api error: {}", message),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

impl fmt::Display for InfrastructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { message, .. } => write!(f, "database error: {}", message),
            Self::Configuration { message } => write!(f, "configuration error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppErrorKind {
    Validation(ValidationError),
    Domain(DomainError),
    External(ExternalError),
    Infrastructure(InfrastructureError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppError {
    pub kind: AppErrorKind,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: message.into(),
            is_retryable: true,
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Domain(err) => match err {
                DomainError::BankMismatch { .. } => 400,
                DomainError::PaymentNotFound { .. }
                | DomainError::RechargeRequestNotFound { .. }
                | DomainError::BankTransactionNotFound { .. }
                | DomainError::WalletNotFound { .. } => 404,
                DomainError::WalletSuspended { .. } => 403,
                DomainError::AlreadyMatched { .. } | DomainError::InvalidStateTransition { .. } => 409,
            },
            AppErrorKind::External(_) | AppErrorKind::Infrastructure(_) => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Domain(err) => match err {
                DomainError::BankMismatch { .. } => ErrorCode::BankMismatch,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::WalletSuspended { .. } => ErrorCode::WalletSuspended,
                DomainError::AlreadyMatched { .. } => ErrorCode::AlreadyMatched,
                DomainError::RechargeRequestNotFound { .. } => ErrorCode::RechargeRequestNotFound,
                DomainError::BankTransactionNotFound { .. } => ErrorCode::BankTransactionNotFound,
                DomainError::WalletNotFound { .. } => ErrorCode::WalletNotFound,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            },
            AppErrorKind::External(ExternalError::Credential { .. }) => ErrorCode::CredentialError,
            AppErrorKind::External(ExternalError::BankApi { .. }) => ErrorCode::BankApiError,
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                ErrorCode::DatabaseError
            }
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. }) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Message safe to show in the wallet UI
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation(err) => err.to_string(),
            AppErrorKind::Domain(err) => match err {
                DomainError::BankMismatch { .. } => {
                    "The payment was found but it was sent from a different bank. Please resubmit with the correct bank."
                        .to_string()
                }
                DomainError::PaymentNotFound { .. } => {
                    "We could not find your payment yet. Please try again later.".to_string()
                }
                DomainError::WalletSuspended { .. } => {
                    "Your wallet is suspended. Please contact support.".to_string()
                }
                DomainError::AlreadyMatched { .. } => {
                    "This payment has already been credited.".to_string()
                }
                other => other.to_string(),
            },
            AppErrorKind::External(_) | AppErrorKind::Infrastructure(_) => {
                "The bank is temporarily unavailable. Please try again in a few minutes.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Validation(_) | AppErrorKind::Domain(_) => false,
            AppErrorKind::External(_) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. }) => false,
        }
    }

    /// Errors raised before anything was credited or persisted
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::External(_) | AppErrorKind::Infrastructure(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Validation(e) => write!(f, "validation error: {}", e),
            AppErrorKind::Domain(e) => write!(f, "{}", e),
            AppErrorKind::External(e) => write!(f, "{}", e),
            AppErrorKind::Infrastructure(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, code = ?self.error_code(), "Request failed");
        }

        let mut error = json!({
            "code": self.error_code(),
            "message": self.user_message(),
            "retryable": self.is_retryable(),
        });
        if let Some(request_id) = &self.request_id {
            error["request_id"] = json!(request_id);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
