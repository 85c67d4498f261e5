//! Direct partner lookups
//!
//! Neither endpoint credits a wallet. Lookups are mirrored into the local
//! ledger so a later claim can match from cache.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

use super::models::{
    FindPaymentRequest, FindPaymentResponse, PaymentView, VerifyPaymentRequest,
    VerifyPaymentResponse,
};
use super::{json_rejection, tagged, AppState};
use crate::error::AppError;
use crate::services::validation;

/// Handle POST /bancamiga-find-payment
pub async fn find_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FindPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.map_err(|e| tagged(json_rejection(e), &headers))?;

    let date = validation::parse_date(&body.date).map_err(|e| tagged(e, &headers))?;
    let payments = state
        .recharge
        .find_payments(&body.phone_orig, &body.bank_orig, date)
        .await
        .map_err(|e| tagged(e, &headers))?;

    let payments: Vec<PaymentView> = payments.into_iter().map(PaymentView::from).collect();
    Ok(Json(FindPaymentResponse {
        success: true,
        count: payments.len(),
        payments,
    }))
}

/// Handle POST /bancamiga-verify-payment
pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.map_err(|e| tagged(json_rejection(e), &headers))?;

    let payment = state
        .recharge
        .verify(body.into())
        .await
        .map_err(|e| tagged(e, &headers))?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        payment: payment.into(),
    }))
}
