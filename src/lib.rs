//! Wallet top-up reconciliation against Bancamiga pago móvil movements
//!
//! A user claims a payment (phone, bank, amount, last four reference
//! digits); the claim is matched against the partner's movements and, on a
//! match, the wallet is credited exactly once per bank transaction.

pub mod api;
pub mod bank;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
