//! Postgres store against a live database
//!
//! Run with `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.
//! Each test uses fresh references and users so runs do not interfere.

#![cfg(feature = "database")]

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use recharge_backend::database::models::{
    BankTxStatus, NewBankTransaction, NewRechargeRequest, RechargeRequest, RechargeStatus,
};
use recharge_backend::database::postgres::PgStore;
use recharge_backend::database::{ReconciliationStore, Reservation, SettleCommand, SettleOutcome};

async fn store() -> PgStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let store = PgStore::connect(&url, 5).await.unwrap();
    store.run_migrations().await.unwrap();
    store
}

fn unique_reference() -> String {
    let digits: String = Uuid::new_v4()
        .as_u128()
        .to_string()
        .chars()
        .take(12)
        .collect();
    format!("{:0>12}", digits)
}

fn payment(reference: &str, amount: &str) -> NewBankTransaction {
    NewBankTransaction {
        reference: reference.to_string(),
        refpk: None,
        phone_orig: "04141234567".to_string(),
        phone_dest: "04241112233".to_string(),
        amount: BigDecimal::from_str(amount).unwrap(),
        bank_orig: "0172".to_string(),
        transaction_date: Utc::now().naive_utc(),
        raw_data: json!({ "NroReferencia": reference }),
    }
}

async fn open_request(store: &PgStore, user: &str, ttl: Duration) -> RechargeRequest {
    let wallet = store.get_or_create_wallet(user).await.unwrap();
    store
        .insert_recharge_request(NewRechargeRequest {
            wallet_id: wallet.id,
            user_id: user.to_string(),
            claimed_phone: "04141234567".to_string(),
            claimed_amount_ves: BigDecimal::from(100),
            claimed_bank: "0172".to_string(),
            claimed_last_four: "4321".to_string(),
            expires_at: Utc::now() + ttl,
        })
        .await
        .unwrap()
}

fn settle_command(tx_id: Uuid, request: &RechargeRequest, amount: &BigDecimal) -> SettleCommand {
    SettleCommand {
        bank_transaction_id: tx_id,
        recharge_request_id: request.id,
        wallet_id: request.wallet_id,
        user_id: request.user_id.clone(),
        amount_ves: amount.clone(),
        reference: "ref".to_string(),
        admin_id: None,
    }
}

#[tokio::test]
#[ignore]
async fn upsert_is_keyed_by_reference_and_spares_consumed_rows() {
    let store = store().await;
    let reference = unique_reference();
    let user = format!("pg-user-{}", Uuid::new_v4());

    let first = store.upsert_bank_transaction(payment(&reference, "100.00")).await.unwrap();
    let second = store.upsert_bank_transaction(payment(&reference, "100.00")).await.unwrap();
    assert_eq!(first.id, second.id);

    let request = open_request(&store, &user, Duration::hours(24)).await;
    store.reserve_bank_transaction(first.id, request.id, &user).await.unwrap();

    let again = store.upsert_bank_transaction(payment(&reference, "999.00")).await.unwrap();
    assert_eq!(again.status, BankTxStatus::Matched);
    assert_eq!(again.amount, BigDecimal::from_str("100.00").unwrap());
}

#[tokio::test]
#[ignore]
async fn only_one_concurrent_reservation_wins() {
    let store = Arc::new(store().await);
    let tx = store
        .upsert_bank_transaction(payment(&unique_reference(), "50.00"))
        .await
        .unwrap();

    let mut requests = Vec::new();
    for _ in 0..4 {
        let user = format!("pg-user-{}", Uuid::new_v4());
        requests.push(open_request(&store, &user, Duration::hours(24)).await);
    }

    let attempts = requests.iter().map(|r| {
        let store = store.clone();
        let (tx_id, request_id, user) = (tx.id, r.id, r.user_id.clone());
        tokio::spawn(async move { store.reserve_bank_transaction(tx_id, request_id, &user).await })
    });
    let results = futures::future::join_all(attempts).await;

    let reserved = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|r| matches!(r, Reservation::Reserved { .. }))
        .count();
    assert_eq!(reserved, 1);
}

#[tokio::test]
#[ignore]
async fn settle_credits_once_and_replays() {
    let store = store().await;
    let user = format!("pg-user-{}", Uuid::new_v4());
    let request = open_request(&store, &user, Duration::hours(24)).await;
    let tx = store
        .upsert_bank_transaction(payment(&unique_reference(), "100.00"))
        .await
        .unwrap();
    store.reserve_bank_transaction(tx.id, request.id, &user).await.unwrap();

    let first = store.settle(settle_command(tx.id, &request, &tx.amount)).await.unwrap();
    let second = store.settle(settle_command(tx.id, &request, &tx.amount)).await.unwrap();

    let SettleOutcome::Credited { wallet, wallet_transaction } = first else {
        panic!("expected a fresh credit, got {:?}", first);
    };
    assert_eq!(wallet.balance_ves, BigDecimal::from_str("100.00").unwrap());
    match second {
        SettleOutcome::AlreadyCredited { wallet_transaction: replayed, .. } => {
            assert_eq!(replayed.id, wallet_transaction.id)
        }
        other => panic!("expected a replay, got {:?}", other),
    }

    store
        .finalize_bank_transaction(tx.id, wallet_transaction.id)
        .await
        .unwrap();
    let stored = store.find_bank_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BankTxStatus::Verified);

    let closed = store.find_recharge_request(request.id).await.unwrap().unwrap();
    assert_eq!(closed.status, RechargeStatus::Matched);
    assert_eq!(closed.bank_transaction_id, Some(tx.id));
}

#[tokio::test]
#[ignore]
async fn stale_requests_expire() {
    let store = store().await;
    let user = format!("pg-user-{}", Uuid::new_v4());
    let request = open_request(&store, &user, Duration::hours(-1)).await;

    assert!(store.expire_stale_requests(Utc::now()).await.unwrap() >= 1);
    let stored = store.find_recharge_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RechargeStatus::Expired);
}

#[tokio::test]
#[ignore]
async fn concurrent_settles_of_one_request_credit_once() {
    let store = Arc::new(store().await);
    let user = format!("pg-user-{}", Uuid::new_v4());
    let request = open_request(&store, &user, Duration::hours(24)).await;
    let tx = store
        .upsert_bank_transaction(payment(&unique_reference(), "100.00"))
        .await
        .unwrap();
    store.reserve_bank_transaction(tx.id, request.id, &user).await.unwrap();

    let attempts = (0..2).map(|_| {
        let store = store.clone();
        let command = settle_command(tx.id, &request, &tx.amount);
        tokio::spawn(async move { store.settle(command).await })
    });
    let outcomes: Vec<SettleOutcome> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let credited = outcomes
        .iter()
        .filter(|o| matches!(o, SettleOutcome::Credited { .. }))
        .count();
    let replayed = outcomes
        .iter()
        .filter(|o| matches!(o, SettleOutcome::AlreadyCredited { .. }))
        .count();
    assert_eq!((credited, replayed), (1, 1));

    let wallet = store.get_or_create_wallet(&user).await.unwrap();
    assert_eq!(wallet.balance_ves, BigDecimal::from_str("100.00").unwrap());
    let held = store.find_bank_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(held.status, BankTxStatus::Matched);
}
