//! Local mirror of partner-reported payments
//!
//! Rows are keyed by the long reference and never deleted. A row that a
//! request has consumed is never overwritten by a later partner report.

use chrono::{Duration, NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::validation;
use crate::bank::BankPayment;
use crate::database::models::{BankTransaction, NewBankTransaction};
use crate::database::{DatabaseError, ReconciliationStore};

pub struct TransactionLedger {
    store: Arc<dyn ReconciliationStore>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn ReconciliationStore>) -> Self {
        Self { store }
    }

    /// Origin phones are stored in `04XXXXXXXXX` form when they parse, so
    /// cache lookups by the normalized claim phone find them
    pub async fn upsert(&self, mut payment: BankPayment) -> Result<BankTransaction, DatabaseError> {
        match validation::normalize_phone(&payment.phone_orig) {
            Ok(phone) => payment.phone_orig = phone,
            Err(_) => debug!(reference = %payment.reference, "Origin phone kept as reported"),
        }
        self.store
            .upsert_bank_transaction(NewBankTransaction::from(payment))
            .await
    }

    /// Upsert a batch of partner payments, returning the stored rows in order
    pub async fn record_payments(
        &self,
        payments: Vec<BankPayment>,
    ) -> Result<Vec<BankTransaction>, DatabaseError> {
        let mut stored = Vec::with_capacity(payments.len());
        for payment in payments {
            let reference = payment.reference.clone();
            let row = self.upsert(payment).await.map_err(|e| {
                warn!(reference = %reference, error = %e, "Failed to store bank payment");
                e
            })?;
            stored.push(row);
        }
        debug!(count = stored.len(), "Bank payments recorded");
        Ok(stored)
    }

    /// Stored rows from an origin phone dated `today - window_days` or later
    ///
    /// Rows reported under any origin bank are returned; the matcher applies
    /// the bank rule so that a mismatch is detectable from cache.
    pub async fn find_cached(
        &self,
        phone: &str,
        today: NaiveDate,
        window_days: u32,
    ) -> Result<Vec<BankTransaction>, DatabaseError> {
        let since = (today - Duration::days(i64::from(window_days))).and_time(NaiveTime::MIN);
        self.store.find_cached_bank_transactions(phone, since).await
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<BankTransaction>, DatabaseError> {
        self.store.find_bank_transaction(id).await
    }

    pub async fn list_pending(&self) -> Result<Vec<BankTransaction>, DatabaseError> {
        self.store.list_pending_bank_transactions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn payment(reference: &str, date: NaiveDate) -> BankPayment {
        BankPayment {
            reference: reference.to_string(),
            refpk: Some("1".to_string()),
            short_reference: None,
            amount: BigDecimal::from(100),
            phone_orig: "04141234567".to_string(),
            phone_dest: "04241112233".to_string(),
            bank_orig: "0172".to_string(),
            transaction_date: date.and_hms_opt(9, 30, 0).unwrap_or_default(),
            raw_data: json!({ "NroReferencia": reference }),
        }
    }

    #[tokio::test]
    async fn cache_respects_the_window() {
        let ledger = TransactionLedger::new(Arc::new(MemoryStore::new()));
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        ledger
            .record_payments(vec![
                payment("000000013333", today - Duration::days(3)),
                payment("000000014444", today - Duration::days(4)),
            ])
            .await
            .unwrap();

        let cached = ledger.find_cached("04141234567", today, 3).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].reference, "000000013333");

        let other_phone = ledger.find_cached("04169999999", today, 3).await.unwrap();
        assert!(other_phone.is_empty());
    }

    #[tokio::test]
    async fn international_origin_phones_are_cached_in_national_form() {
        let ledger = TransactionLedger::new(Arc::new(MemoryStore::new()));
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let mut international = payment("000000015555", today);
        international.phone_orig = "584141234567".to_string();
        let mut unparsable = payment("000000016666", today);
        unparsable.phone_orig = "02121234567".to_string();

        let stored = ledger
            .record_payments(vec![international, unparsable])
            .await
            .unwrap();
        assert_eq!(stored[0].phone_orig, "04141234567");
        assert_eq!(stored[1].phone_orig, "02121234567");

        let cached = ledger.find_cached("04141234567", today, 3).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].reference, "000000015555");
    }
}
