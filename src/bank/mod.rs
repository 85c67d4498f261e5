//! Partner bank (pago móvil) integration
//!
//! - [`token_manager`] owns the credential triple and refreshes it
//! - [`client`] queries the movements endpoints
//! - [`types`] holds the wire format

pub mod client;
pub mod token_manager;
pub mod types;

pub use client::BankClient;
pub use token_manager::{CredentialStore, Credentials};
pub use types::{BankEnvelope, BankPayment};

use crate::error::{AppError, AppErrorKind, ExternalError};

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("credential error: {0}")]
    Credential(String),

    #[error("partner rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("partner returned HTTP {status}")]
    Status { status: u16 },

    #[error("http error: {0}")]
    Http(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("history lookup rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BankError {
    pub fn is_credential(&self) -> bool {
        matches!(self, BankError::Credential(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BankError::Timeout { .. })
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            BankError::Timeout { secs: timeout_secs }
        } else {
            BankError::Http(err.to_string())
        }
    }
}

impl From<BankError> for AppError {
    fn from(err: BankError) -> Self {
        let external = match err {
            BankError::Credential(message) => ExternalError::Credential { message },
            BankError::Rejected { code, message } => ExternalError::BankApi {
                message,
                code: Some(code),
                is_timeout: false,
            },
            BankError::Status { status } => ExternalError::BankApi {
                message: format!("partner returned HTTP {}", status),
                code: Some(i64::from(status)),
                is_timeout: false,
            },
            BankError::Timeout { secs } => ExternalError::BankApi {
                message: format!("request timed out after {}s", secs),
                code: None,
                is_timeout: true,
            },
            other => ExternalError::BankApi {
                message: other.to_string(),
                code: None,
                is_timeout: false,
            },
        };
        AppError::new(AppErrorKind::External(external))
    }
}
