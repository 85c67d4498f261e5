use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::info;
use uuid::Uuid;

use super::models::{RechargeResponse, WalletRechargeRequest};
use super::{json_rejection, path_rejection, tagged, AppState};
use crate::error::AppError;
use crate::services::RechargeOutcome;

fn respond(outcome: RechargeOutcome) -> (StatusCode, Json<RechargeResponse>) {
    let body = RechargeResponse::from_receipt(outcome.request.id, &outcome.receipt);
    (StatusCode::OK, Json(body))
}

/// Handle POST /wallet-recharge
///
/// Creates a recharge request for the claim and resolves it immediately.
pub async fn wallet_recharge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<WalletRechargeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.map_err(|e| tagged(json_rejection(e), &headers))?;

    info!(user_id = %body.user_id, bank = %body.banco_orig, "Wallet recharge submitted");

    let outcome = state
        .recharge
        .claim_and_resolve(body.into())
        .await
        .map_err(|e| tagged(e, &headers))?;

    Ok(respond(outcome))
}

/// Handle GET /recharge-requests/{id}
pub async fn get_recharge_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id.map_err(|e| tagged(path_rejection(e), &headers))?;

    let request = state
        .recharge
        .get(id)
        .await
        .map_err(|e| tagged(e, &headers))?;

    Ok(Json(request))
}

/// Handle POST /recharge-requests/{id}/resolve
///
/// Retries resolution of an existing request; a matched request returns its
/// stored credit without touching the bank.
pub async fn resolve_recharge_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id.map_err(|e| tagged(path_rejection(e), &headers))?;

    let outcome = state
        .recharge
        .resolve(id)
        .await
        .map_err(|e| tagged(e, &headers))?;

    Ok(respond(outcome))
}
