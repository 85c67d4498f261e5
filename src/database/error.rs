//! Persistence errors

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("stored row is invalid: {0}")]
    Decode(String),

    #[error("migration error: {0}")]
    Migration(String),
}

impl DatabaseError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DatabaseError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::Connection(_) | DatabaseError::Query(_) | DatabaseError::Conflict(_)
        )
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound {
                entity: "row",
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseError::Decode(err.to_string())
            }
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => match entity {
                "recharge_request" => {
                    AppError::domain(DomainError::RechargeRequestNotFound { request_id: id })
                }
                "bank_transaction" => AppError::domain(DomainError::BankTransactionNotFound {
                    bank_transaction_id: id,
                }),
                "wallet" => AppError::domain(DomainError::WalletNotFound { wallet_id: id }),
                _ => AppError::database(format!("{} {} not found", entity, id)),
            },
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_request_maps_to_404() {
        let app: AppError = DatabaseError::not_found("recharge_request", "abc").into();
        assert_eq!(app.status_code(), 404);
    }

    #[test]
    fn decode_errors_are_not_retryable() {
        let app: AppError = DatabaseError::Decode("bad status".into()).into();
        assert_eq!(app.status_code(), 500);
        assert!(!app.is_retryable());

        let app: AppError = DatabaseError::Connection("refused".into()).into();
        assert!(app.is_retryable());
    }
}
