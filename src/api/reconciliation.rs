//! Operator endpoints for manual reconciliation and wallet status

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use super::models::{ManualReconcileRequest, RechargeResponse, WalletBalance, WalletStatusRequest};
use super::{json_rejection, path_rejection, tagged, AppState};
use crate::error::AppError;

/// Handle GET /admin/reconciliation/pending
pub async fn list_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let items = state
        .reconciliation
        .pending_items()
        .await
        .map_err(|e| tagged(e, &headers))?;
    Ok(Json(items))
}

/// Handle POST /admin/reconciliation/manual
pub async fn manual_reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ManualReconcileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.map_err(|e| tagged(json_rejection(e), &headers))?;

    let receipt = state
        .reconciliation
        .manual_reconcile(
            body.bank_transaction_id,
            body.recharge_request_id,
            &body.admin_id,
        )
        .await
        .map_err(|e| tagged(e, &headers))?;

    Ok(Json(RechargeResponse::from_receipt(
        body.recharge_request_id,
        &receipt,
    )))
}

/// Handle GET /admin/reconciliation/audit
pub async fn audit_trail(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let entries = state
        .reconciliation
        .audit_trail()
        .await
        .map_err(|e| tagged(e, &headers))?;
    Ok(Json(json!({ "count": entries.len(), "entries": entries })))
}

/// Handle PUT /admin/wallets/{id}/status
pub async fn set_wallet_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<WalletStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(wallet_id) = id.map_err(|e| tagged(path_rejection(e), &headers))?;
    let Json(body) = body.map_err(|e| tagged(json_rejection(e), &headers))?;

    let wallet = state
        .reconciliation
        .set_wallet_status(wallet_id, body.status)
        .await
        .map_err(|e| tagged(e, &headers))?;

    Ok(Json(json!({
        "wallet_id": wallet.id,
        "user_id": wallet.user_id,
        "status": wallet.status,
        "balance": WalletBalance::from(&wallet),
    })))
}
