//! Middleware modules for the recharge backend
//!
//! Provides request/response logging and timing wrappers for outbound calls

pub mod logging;
