//! Postgres-backed store
//!
//! Reservation and finalization are single conditional `UPDATE`s; settle runs
//! in one SQL transaction with the request and wallet rows locked.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::DatabaseError;
use super::models::{
    AuditEntry, BankTransaction, FailureReason, NewBankTransaction, NewRechargeRequest,
    RechargeRequest, RechargeStatus, UnknownStatus, Wallet, WalletStatus, WalletTransaction,
};
use super::store::{ReconciliationStore, Reservation, SettleCommand, SettleOutcome};
use crate::middleware::logging::log_database_query;

const WALLET_COLUMNS: &str = "id, user_id, balance_ves, balance_usd, status, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, wallet_id, user_id, claimed_phone, claimed_amount_ves, \
     claimed_bank, claimed_last_four, status, failure_reason, bank_transaction_id, created_at, \
     expires_at, updated_at";

const BANK_TX_COLUMNS: &str = "id, reference, refpk, phone_orig, phone_dest, amount, bank_orig, \
     transaction_date, status, matched_user_id, matched_request_id, \
     matched_wallet_transaction_id, raw_data, created_at, updated_at";

const WALLET_TX_COLUMNS: &str = "id, wallet_id, user_id, recharge_request_id, \
     bank_transaction_id, amount_ves, reference, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        info!(max_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_bank_transaction(&self, id: Uuid) -> Result<Option<BankTransaction>, DatabaseError> {
        let sql = format!("SELECT {} FROM bank_transactions WHERE id = $1", BANK_TX_COLUMNS);
        let row = log_database_query(
            "select_bank_transaction",
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(bank_tx_from_row).transpose()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_status<T>(value: &str) -> Result<T, DatabaseError>
where
    T: FromStr<Err = UnknownStatus>,
{
    T::from_str(value).map_err(|e| DatabaseError::Decode(e.to_string()))
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, DatabaseError> {
    let status: String = row.try_get("status")?;
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance_ves: row.try_get("balance_ves")?,
        balance_usd: row.try_get("balance_usd")?,
        status: parse_status::<WalletStatus>(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<RechargeRequest, DatabaseError> {
    let status: String = row.try_get("status")?;
    let failure_reason: Option<String> = row.try_get("failure_reason")?;
    Ok(RechargeRequest {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        user_id: row.try_get("user_id")?,
        claimed_phone: row.try_get("claimed_phone")?,
        claimed_amount_ves: row.try_get("claimed_amount_ves")?,
        claimed_bank: row.try_get("claimed_bank")?,
        claimed_last_four: row.try_get("claimed_last_four")?,
        status: parse_status::<RechargeStatus>(&status)?,
        failure_reason: failure_reason
            .as_deref()
            .map(parse_status::<FailureReason>)
            .transpose()?,
        bank_transaction_id: row.try_get("bank_transaction_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn bank_tx_from_row(row: &PgRow) -> Result<BankTransaction, DatabaseError> {
    let status: String = row.try_get("status")?;
    Ok(BankTransaction {
        id: row.try_get("id")?,
        reference: row.try_get("reference")?,
        refpk: row.try_get("refpk")?,
        phone_orig: row.try_get("phone_orig")?,
        phone_dest: row.try_get("phone_dest")?,
        amount: row.try_get("amount")?,
        bank_orig: row.try_get("bank_orig")?,
        transaction_date: row.try_get("transaction_date")?,
        status: parse_status(&status)?,
        matched_user_id: row.try_get("matched_user_id")?,
        matched_request_id: row.try_get("matched_request_id")?,
        matched_wallet_transaction_id: row.try_get("matched_wallet_transaction_id")?,
        raw_data: row.try_get("raw_data")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn wallet_tx_from_row(row: &PgRow) -> Result<WalletTransaction, DatabaseError> {
    Ok(WalletTransaction {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        user_id: row.try_get("user_id")?,
        recharge_request_id: row.try_get("recharge_request_id")?,
        bank_transaction_id: row.try_get("bank_transaction_id")?,
        amount_ves: row.try_get("amount_ves")?,
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry, DatabaseError> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        admin_id: row.try_get("admin_id")?,
        bank_transaction_id: row.try_get("bank_transaction_id")?,
        recharge_request_id: row.try_get("recharge_request_id")?,
        timestamp: row.try_get("timestamp")?,
    })
}

// ============================================================================
// Store implementation
// ============================================================================

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let sql = format!(
            "INSERT INTO wallets (id, user_id) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING {}",
            WALLET_COLUMNS
        );
        let row = log_database_query(
            "upsert_wallet",
            sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(user_id)
                .fetch_one(&self.pool),
        )
        .await?;
        wallet_from_row(&row)
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        let sql = format!("SELECT {} FROM wallets WHERE id = $1", WALLET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn set_wallet_status(
        &self,
        wallet_id: Uuid,
        status: WalletStatus,
    ) -> Result<Wallet, DatabaseError> {
        let sql = format!(
            "UPDATE wallets SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            WALLET_COLUMNS
        );
        let row = log_database_query(
            "update_wallet_status",
            sqlx::query(&sql)
                .bind(wallet_id)
                .bind(status.as_str())
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or_else(|| DatabaseError::not_found("wallet", wallet_id))?;
        wallet_from_row(&row)
    }

    async fn find_wallet_transaction_by_bank_tx(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Option<WalletTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM wallet_transactions WHERE bank_transaction_id = $1",
            WALLET_TX_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(bank_transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(wallet_tx_from_row).transpose()
    }

    async fn insert_recharge_request(
        &self,
        request: NewRechargeRequest,
    ) -> Result<RechargeRequest, DatabaseError> {
        let sql = format!(
            "INSERT INTO recharge_requests \
             (id, wallet_id, user_id, claimed_phone, claimed_amount_ves, claimed_bank, \
              claimed_last_four, status, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8) \
             RETURNING {}",
            REQUEST_COLUMNS
        );
        let row = log_database_query(
            "insert_recharge_request",
            sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(request.wallet_id)
                .bind(&request.user_id)
                .bind(&request.claimed_phone)
                .bind(&request.claimed_amount_ves)
                .bind(&request.claimed_bank)
                .bind(&request.claimed_last_four)
                .bind(request.expires_at)
                .fetch_one(&self.pool),
        )
        .await?;
        request_from_row(&row)
    }

    async fn find_recharge_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<RechargeRequest>, DatabaseError> {
        let sql = format!("SELECT {} FROM recharge_requests WHERE id = $1", REQUEST_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn mark_request_failed(
        &self,
        request_id: Uuid,
        reason: FailureReason,
    ) -> Result<Option<RechargeRequest>, DatabaseError> {
        let sql = format!(
            "UPDATE recharge_requests SET status = 'failed', failure_reason = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            REQUEST_COLUMNS
        );
        let row = log_database_query(
            "fail_recharge_request",
            sqlx::query(&sql)
                .bind(request_id)
                .bind(reason.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            Some(row) => request_from_row(&row).map(Some),
            None => match self.find_recharge_request(request_id).await? {
                Some(_) => Ok(None),
                None => Err(DatabaseError::not_found("recharge_request", request_id)),
            },
        }
    }

    async fn expire_stale_requests(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = log_database_query(
            "expire_recharge_requests",
            sqlx::query(
                "UPDATE recharge_requests SET status = 'expired', updated_at = $1 \
                 WHERE status = 'pending' AND expires_at < $1",
            )
            .bind(now)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_open_requests(&self) -> Result<Vec<RechargeRequest>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM recharge_requests WHERE status IN ('pending', 'expired') \
             ORDER BY created_at ASC",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn upsert_bank_transaction(
        &self,
        tx: NewBankTransaction,
    ) -> Result<BankTransaction, DatabaseError> {
        let sql = format!(
            "INSERT INTO bank_transactions \
             (id, reference, refpk, phone_orig, phone_dest, amount, bank_orig, transaction_date, raw_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (reference) DO UPDATE SET \
               refpk = EXCLUDED.refpk, phone_orig = EXCLUDED.phone_orig, \
               phone_dest = EXCLUDED.phone_dest, amount = EXCLUDED.amount, \
               bank_orig = EXCLUDED.bank_orig, transaction_date = EXCLUDED.transaction_date, \
               raw_data = EXCLUDED.raw_data, updated_at = NOW() \
             WHERE bank_transactions.status = 'pending' \
             RETURNING {}",
            BANK_TX_COLUMNS
        );
        let row = log_database_query(
            "upsert_bank_transaction",
            sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(&tx.reference)
                .bind(&tx.refpk)
                .bind(&tx.phone_orig)
                .bind(&tx.phone_dest)
                .bind(&tx.amount)
                .bind(&tx.bank_orig)
                .bind(tx.transaction_date)
                .bind(&tx.raw_data)
                .fetch_optional(&self.pool),
        )
        .await?;

        if let Some(row) = row {
            return bank_tx_from_row(&row);
        }

        // Conflict on a consumed row: the stored version wins
        let sql = format!("SELECT {} FROM bank_transactions WHERE reference = $1", BANK_TX_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(&tx.reference)
            .fetch_one(&self.pool)
            .await?;
        bank_tx_from_row(&row)
    }

    async fn find_cached_bank_transactions(
        &self,
        phone_orig: &str,
        since: NaiveDateTime,
    ) -> Result<Vec<BankTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM bank_transactions \
             WHERE phone_orig = $1 AND transaction_date >= $2 \
             ORDER BY transaction_date DESC",
            BANK_TX_COLUMNS
        );
        let rows = log_database_query(
            "select_cached_bank_transactions",
            sqlx::query(&sql)
                .bind(phone_orig)
                .bind(since)
                .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(bank_tx_from_row).collect()
    }

    async fn find_bank_transaction(
        &self,
        id: Uuid,
    ) -> Result<Option<BankTransaction>, DatabaseError> {
        self.fetch_bank_transaction(id).await
    }

    async fn list_pending_bank_transactions(&self) -> Result<Vec<BankTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM bank_transactions WHERE status = 'pending' \
             ORDER BY transaction_date DESC",
            BANK_TX_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(bank_tx_from_row).collect()
    }

    async fn reserve_bank_transaction(
        &self,
        id: Uuid,
        request_id: Uuid,
        user_id: &str,
    ) -> Result<Reservation, DatabaseError> {
        let sql = format!(
            "UPDATE bank_transactions \
             SET status = 'matched', matched_request_id = $2, matched_user_id = $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            BANK_TX_COLUMNS
        );
        let row = log_database_query(
            "reserve_bank_transaction",
            sqlx::query(&sql)
                .bind(id)
                .bind(request_id)
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        if let Some(row) = row {
            return Ok(Reservation::Reserved {
                transaction: bank_tx_from_row(&row)?,
                resumed: false,
            });
        }

        let current = self
            .fetch_bank_transaction(id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("bank_transaction", id))?;

        if current.matched_request_id == Some(request_id) {
            Ok(Reservation::Reserved {
                transaction: current,
                resumed: true,
            })
        } else {
            Ok(Reservation::Taken {
                holder: current.matched_request_id,
            })
        }
    }

    async fn release_reservation(
        &self,
        id: Uuid,
        request_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = log_database_query(
            "release_bank_transaction",
            sqlx::query(
                "UPDATE bank_transactions \
                 SET status = 'pending', matched_request_id = NULL, matched_user_id = NULL, updated_at = NOW() \
                 WHERE id = $1 AND status = 'matched' AND matched_request_id = $2",
            )
            .bind(id)
            .bind(request_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, command), fields(bank_tx_id = %command.bank_transaction_id, request_id = %command.recharge_request_id))]
    async fn settle(&self, command: SettleCommand) -> Result<SettleOutcome, DatabaseError> {
        let mut db_tx = self.pool.begin().await?;

        // Serializes settles of one payment; a second resolve of the same
        // request waits here and then sees the committed wallet transaction
        let locked: Option<Option<Uuid>> = sqlx::query_scalar(
            "SELECT matched_request_id FROM bank_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(command.bank_transaction_id)
        .fetch_optional(&mut *db_tx)
        .await?;
        if locked.is_none() {
            db_tx.rollback().await?;
            return Err(DatabaseError::not_found(
                "bank_transaction",
                command.bank_transaction_id,
            ));
        }

        let sql = format!(
            "SELECT {} FROM wallet_transactions WHERE bank_transaction_id = $1",
            WALLET_TX_COLUMNS
        );
        let existing = sqlx::query(&sql)
            .bind(command.bank_transaction_id)
            .fetch_optional(&mut *db_tx)
            .await?;

        if let Some(row) = existing {
            let wallet_transaction = wallet_tx_from_row(&row)?;
            let sql = format!("SELECT {} FROM wallets WHERE id = $1", WALLET_COLUMNS);
            let wallet_row = sqlx::query(&sql)
                .bind(wallet_transaction.wallet_id)
                .fetch_one(&mut *db_tx)
                .await?;
            db_tx.commit().await?;
            return Ok(SettleOutcome::AlreadyCredited {
                wallet: wallet_from_row(&wallet_row)?,
                wallet_transaction,
            });
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM recharge_requests WHERE id = $1 FOR UPDATE")
                .bind(command.recharge_request_id)
                .fetch_optional(&mut *db_tx)
                .await?;
        let status = status
            .ok_or_else(|| DatabaseError::not_found("recharge_request", command.recharge_request_id))?;
        let status = parse_status::<RechargeStatus>(&status)?;
        if !status.can_transition_to(RechargeStatus::Matched) {
            db_tx.rollback().await?;
            return Ok(SettleOutcome::RequestClosed { status });
        }

        let wallet_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM wallets WHERE id = $1 FOR UPDATE")
                .bind(command.wallet_id)
                .fetch_optional(&mut *db_tx)
                .await?;
        let wallet_status = wallet_status
            .ok_or_else(|| DatabaseError::not_found("wallet", command.wallet_id))?;
        if parse_status::<WalletStatus>(&wallet_status)? != WalletStatus::Active {
            db_tx.rollback().await?;
            return Ok(SettleOutcome::WalletSuspended);
        }

        let sql = format!(
            "UPDATE wallets SET balance_ves = balance_ves + $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            WALLET_COLUMNS
        );
        let wallet_row = sqlx::query(&sql)
            .bind(command.wallet_id)
            .bind(&command.amount_ves)
            .fetch_one(&mut *db_tx)
            .await?;
        let wallet = wallet_from_row(&wallet_row)?;

        let sql = format!(
            "INSERT INTO wallet_transactions \
             (id, wallet_id, user_id, recharge_request_id, bank_transaction_id, amount_ves, reference) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            WALLET_TX_COLUMNS
        );
        let wallet_tx_row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(command.wallet_id)
            .bind(&command.user_id)
            .bind(command.recharge_request_id)
            .bind(command.bank_transaction_id)
            .bind(&command.amount_ves)
            .bind(&command.reference)
            .fetch_one(&mut *db_tx)
            .await?;
        let wallet_transaction = wallet_tx_from_row(&wallet_tx_row)?;

        sqlx::query(
            "UPDATE recharge_requests \
             SET status = 'matched', failure_reason = NULL, bank_transaction_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'expired')",
        )
        .bind(command.recharge_request_id)
        .bind(command.bank_transaction_id)
        .execute(&mut *db_tx)
        .await?;

        if let Some(admin_id) = &command.admin_id {
            sqlx::query(
                "INSERT INTO reconciliation_audit (id, admin_id, bank_transaction_id, recharge_request_id) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(admin_id)
            .bind(command.bank_transaction_id)
            .bind(command.recharge_request_id)
            .execute(&mut *db_tx)
            .await?;
        }

        log_database_query("commit_settle", db_tx.commit()).await?;

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
        let result = log_database_query(
            "finalize_bank_transaction",
            sqlx::query(
                "UPDATE bank_transactions \
                 SET status = 'verified', matched_wallet_transaction_id = $2, updated_at = NOW() \
                 WHERE id = $1 AND (status = 'matched' \
                   OR (status = 'verified' AND matched_wallet_transaction_id = $2))",
            )
            .bind(id)
            .bind(wallet_transaction_id)
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            warn!(bank_tx_id = %id, "Bank transaction was not in matched state at finalize");
            return Err(DatabaseError::Conflict(format!(
                "bank transaction {} is not reserved",
                id
            )));
        }
        Ok(())
    }

    async fn list_audit_entries(&self) -> Result<Vec<AuditEntry>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, admin_id, bank_transaction_id, recharge_request_id, timestamp \
             FROM reconciliation_audit ORDER BY timestamp DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }
}
