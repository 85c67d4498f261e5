//! Services module for reconciliation business logic

pub mod matcher;
pub mod recharge;
pub mod reconciliation;
pub mod transaction_ledger;
pub mod validation;
pub mod wallet_ledger;

pub use matcher::{Claim, MatchOutcome, ReferenceMatcher};
pub use recharge::{RechargeClaim, RechargeOutcome, RechargeService, RechargeSettings};
pub use reconciliation::{PendingItems, ReconciliationService};
pub use transaction_ledger::TransactionLedger;
pub use wallet_ledger::{CreditCommand, CreditReceipt, PersistenceWarning, WalletLedger};
