//! Reference matching
//!
//! A claim names an origin phone, an origin bank, the last 4 characters of
//! the payment reference and the amount. A payment matches when the suffix is
//! equal and the amount is within tolerance; among those, only payments from
//! the claimed bank are candidates. Finding matching payments that all came
//! from another bank is a hard mismatch and ends the search.

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::transaction_ledger::TransactionLedger;
use crate::bank::{BankClient, BankError};
use crate::database::models::BankTransaction;
use crate::error::AppError;
use crate::logging::mask_phone;

#[derive(Debug, Clone)]
pub struct Claim {
    pub phone: String,
    pub bank: String,
    pub last_four: String,
    pub amount: BigDecimal,
    /// Rows already reserved by this request count as available
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DayMatch<'a> {
    Candidate(&'a BankTransaction),
    Mismatch(&'a BankTransaction),
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Found(BankTransaction),
    BankMismatch(BankTransaction),
    NotFound,
}

/// Calendar days to scan, newest first: `today` back to `today - window` inclusive
pub fn window_days(today: NaiveDate, window: u32) -> Vec<NaiveDate> {
    (0..=i64::from(window))
        .map(|offset| today - Duration::days(offset))
        .collect()
}

pub fn within_tolerance(amount: &BigDecimal, claimed: &BigDecimal, tolerance: &BigDecimal) -> bool {
    (amount - claimed).abs() <= *tolerance
}

/// Apply the suffix, amount and bank rules to one day's rows
pub fn match_day<'a>(
    rows: &'a [BankTransaction],
    claim: &Claim,
    tolerance: &BigDecimal,
) -> DayMatch<'a> {
    let filtered: Vec<&BankTransaction> = rows
        .iter()
        .filter(|tx| tx.last_four() == claim.last_four)
        .filter(|tx| within_tolerance(&tx.amount, &claim.amount, tolerance))
        .collect();

    let Some(first) = filtered.first().copied() else {
        return DayMatch::Nothing;
    };

    // Still-pending rows win, then the most recent
    let best = filtered
        .iter()
        .copied()
        .filter(|tx| tx.bank_orig == claim.bank)
        .max_by(|a, b| {
            a.is_pending()
                .cmp(&b.is_pending())
                .then(a.transaction_date.cmp(&b.transaction_date))
        });

    match best {
        Some(tx) => DayMatch::Candidate(tx),
        None => DayMatch::Mismatch(first),
    }
}

fn is_available(tx: &BankTransaction, claim: &Claim) -> bool {
    tx.is_pending() || (claim.request_id.is_some() && tx.matched_request_id == claim.request_id)
}

pub struct ReferenceMatcher {
    ledger: Arc<TransactionLedger>,
    bank: Arc<BankClient>,
    tolerance: BigDecimal,
    window: u32,
}

impl ReferenceMatcher {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        bank: Arc<BankClient>,
        tolerance: BigDecimal,
        window: u32,
    ) -> Self {
        Self {
            ledger,
            bank,
            tolerance,
            window,
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Walk the window newest first, serving each day from the ledger when
    /// it already decides the claim and from the partner otherwise
    #[instrument(skip(self, claim), fields(phone = %mask_phone(&claim.phone), bank = %claim.bank, last_four = %claim.last_four))]
    pub async fn find(&self, claim: &Claim, today: NaiveDate) -> Result<MatchOutcome, AppError> {
        let cached = self
            .ledger
            .find_cached(&claim.phone, today, self.window)
            .await?;

        let mut last_error: Option<BankError> = None;
        let mut any_succeeded = false;

        for day in window_days(today, self.window) {
            let day_rows: Vec<BankTransaction> = cached
                .iter()
                .filter(|tx| tx.transaction_date.date() == day)
                .cloned()
                .collect();

            if let Some(outcome) = self.decide_from_cache(&day_rows, claim, day) {
                return Ok(outcome);
            }

            let payments = match self.bank.search_payments(&claim.phone, &claim.bank, day).await {
                Ok(payments) => payments,
                Err(e) if e.is_credential() => return Err(e.into()),
                Err(e) => {
                    warn!(day = %day, error = %e, timeout = e.is_timeout(), "Day lookup failed, continuing scan");
                    last_error = Some(e);
                    continue;
                }
            };
            any_succeeded = true;

            let rows = self.ledger.record_payments(payments).await?;
            match match_day(&rows, claim, &self.tolerance) {
                // A consumed row is still returned so the reservation reports it
                DayMatch::Candidate(tx) => {
                    info!(reference = %tx.reference, day = %day, available = is_available(tx, claim), "Matched payment from bank");
                    return Ok(MatchOutcome::Found(tx.clone()));
                }
                DayMatch::Mismatch(tx) => {
                    warn!(reference = %tx.reference, reported_bank = %tx.bank_orig, day = %day, "Bank mismatch");
                    return Ok(MatchOutcome::BankMismatch(tx.clone()));
                }
                DayMatch::Nothing => {}
            }
        }

        match last_error {
            Some(e) if !any_succeeded => Err(e.into()),
            _ => Ok(MatchOutcome::NotFound),
        }
    }

    /// `None` when the ledger rows for `day` cannot settle the claim
    fn decide_from_cache(
        &self,
        rows: &[BankTransaction],
        claim: &Claim,
        day: NaiveDate,
    ) -> Option<MatchOutcome> {
        match match_day(rows, claim, &self.tolerance) {
            DayMatch::Candidate(tx) if is_available(tx, claim) => {
                info!(reference = %tx.reference, day = %day, "Matched payment from cache");
                Some(MatchOutcome::Found(tx.clone()))
            }
            DayMatch::Candidate(tx) => {
                debug!(reference = %tx.reference, day = %day, "Cached candidate already consumed, refreshing day");
                None
            }
            DayMatch::Mismatch(tx) => {
                warn!(reference = %tx.reference, reported_bank = %tx.bank_orig, day = %day, "Bank mismatch in cache");
                Some(MatchOutcome::BankMismatch(tx.clone()))
            }
            DayMatch::Nothing => None,
        }
    }
}
