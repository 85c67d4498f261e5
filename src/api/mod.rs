//! HTTP surface
//!
//! Handlers stay thin: decode the body, hand it to a service and turn the
//! outcome into JSON. Every error response carries the `x-request-id` of the
//! request that produced it.

pub mod bank_lookup;
pub mod health;
pub mod models;
pub mod recharge;
pub mod reconciliation;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::HeaderMap,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::database::ReconciliationStore;
use crate::error::{AppError, ValidationError};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{RechargeService, ReconciliationService};

#[derive(Clone)]
pub struct AppState {
    pub recharge: Arc<RechargeService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub store: Arc<dyn ReconciliationStore>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/wallet-recharge", post(recharge::wallet_recharge))
        .route("/recharge-requests/{id}", get(recharge::get_recharge_request))
        .route(
            "/recharge-requests/{id}/resolve",
            post(recharge::resolve_recharge_request),
        )
        .route("/bancamiga-find-payment", post(bank_lookup::find_payment))
        .route("/bancamiga-verify-payment", post(bank_lookup::verify_payment))
        .route(
            "/admin/reconciliation/pending",
            get(reconciliation::list_pending),
        )
        .route(
            "/admin/reconciliation/manual",
            post(reconciliation::manual_reconcile),
        )
        .route("/admin/reconciliation/audit", get(reconciliation::audit_trail))
        .route(
            "/admin/wallets/{id}/status",
            put(reconciliation::set_wallet_status),
        )
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}

/// Request id assigned by `SetRequestIdLayer`
pub(crate) fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Attach the request id to an error, when there is one
pub(crate) fn tagged(err: AppError, headers: &HeaderMap) -> AppError {
    match request_id(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

pub(crate) fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::validation(ValidationError::MalformedBody {
        reason: rejection.body_text(),
    })
}

pub(crate) fn path_rejection(rejection: PathRejection) -> AppError {
    AppError::validation(ValidationError::MalformedBody {
        reason: rejection.body_text(),
    })
}
