//! Partner bank client against a mock server
//!
//! Covers token refresh (single flight, rejection), movement decoding,
//! application error codes and the history rate limit.

mod common;

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use recharge_backend::bank::{BankClient, BankError, CredentialStore, Credentials};
use recharge_backend::error::{AppError, ErrorCode};

fn expiring_credentials() -> Credentials {
    // Inside the 300s refresh margin
    Credentials::new("stale-access", "stale-refresh", Utc::now().timestamp() + 60)
}

async fn mount_refresh(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token/refresh"))
        .and(body_partial_json(json!({ "refresh_token": "stale-refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "Message": "OK",
            "token": "fresh-access",
            "refresh_token": "fresh-refresh",
            "expires_at": Utc::now().timestamp() + 3600,
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_calls_near_expiry_refresh_once() {
    let server = MockServer::start().await;
    mount_refresh(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/movements/mobile/find"))
        .and(header("authorization", "Bearer fresh-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "lista": [movement("000123454321", "100.00", BANK, today(), "10:00:00")],
        })))
        .expect(5)
        .mount(&server)
        .await;

    let client = Arc::new(bank_client(
        &server,
        expiring_credentials(),
        Duration::from_secs(2),
    ));

    let calls = (0..5).map(|_| {
        let client = client.clone();
        async move { client.search_payments(PHONE, BANK, today()).await }
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        let payments = result.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].last_four(), "4321");
        assert_eq!(payments[0].amount, dec("100.00"));
    }
}

#[tokio::test]
async fn rejected_refresh_is_a_credential_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 401,
            "Message": "refresh token vencido",
        })))
        .mount(&server)
        .await;

    let client = bank_client(&server, expiring_credentials(), Duration::from_secs(2));
    let err = client
        .search_payments(PHONE, BANK, today())
        .await
        .unwrap_err();
    assert!(err.is_credential());

    let app: AppError = err.into();
    assert_eq!(app.error_code(), ErrorCode::CredentialError);
    assert_eq!(app.status_code(), 500);
}

#[tokio::test]
async fn login_issues_tokens_when_none_are_held() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(json!({ "Dni": "V12345678", "Pass": "s3cret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "token": "issued-access",
            "refresh_token": "issued-refresh",
            "expires_at": Utc::now().timestamp() + 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = CredentialStore::new(server.uri(), None, 300, Duration::from_secs(2))
        .with_login("V12345678", "s3cret".to_string().into());
    assert!(!store.has_credentials().await);

    assert_eq!(store.ensure_valid().await.unwrap(), "issued-access");
    assert!(store.has_credentials().await);
    // Held and fresh now; no second issuance
    assert_eq!(store.ensure_valid().await.unwrap(), "issued-access");
}

#[tokio::test]
async fn non_success_code_is_a_bank_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/movements/mobile/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 400,
            "Message": "Parametros invalidos",
        })))
        .mount(&server)
        .await;

    let client = bank_client(&server, valid_credentials(), Duration::from_secs(2));
    let err = client
        .search_payments(PHONE, BANK, today())
        .await
        .unwrap_err();
    assert!(matches!(err, BankError::Rejected { code: 400, .. }));

    let app: AppError = err.into();
    assert_eq!(app.error_code(), ErrorCode::BankApiError);
    assert!(app.is_retryable());
}

#[tokio::test]
async fn malformed_movements_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/movements/mobile/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "lista": [
                movement("000123454321", "100.00", BANK, today(), "10:00:00"),
                { "NroReferencia": "000999998888", "Amount": "cien", "FechaMovimiento": "2026-10-18" },
            ],
        })))
        .mount(&server)
        .await;

    let client = bank_client(&server, valid_credentials(), Duration::from_secs(2));
    let payments = client.search_payments(PHONE, BANK, today()).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].reference, "000123454321");
}

#[tokio::test]
async fn history_is_limited_to_one_call_per_interval() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/movements/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Code": 200,
            "lista": [movement("000123454321", "100.00", BANK, today(), "10:00:00")],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(CredentialStore::new(
        server.uri(),
        Some(valid_credentials()),
        300,
        Duration::from_secs(2),
    ));
    let client = BankClient::new(
        server.uri(),
        credentials,
        Duration::from_secs(2),
        Duration::from_secs(600),
    );

    assert_eq!(client.search_history(today()).await.unwrap().len(), 1);
    let err = client.search_history(today()).await.unwrap_err();
    assert!(matches!(err, BankError::RateLimited { .. }));
}
