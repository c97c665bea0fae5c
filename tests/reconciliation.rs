/// Reconciliation, entry-fee split and join-flow tests
///
/// These run against the in-memory ledger, which has the same atomicity as
/// the Postgres store, with the revenue worker running for real.
mod common;

use bingo_payment_relay::analytics;
use bingo_payment_relay::errors::RelayError;
use bingo_payment_relay::games;
use bingo_payment_relay::models::{
    NewGameRoom, PaymentCallback, RevenueType, TransactionStatus, TransactionType, WalletStatus,
};
use bingo_payment_relay::reconciler::ReconcileOutcome;
use bingo_payment_relay::revenue::RevenueService;
use bingo_payment_relay::store::LedgerStore;
use chrono::Utc;
use common::{FlakyLedger, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

fn callback(tx_ref: &str, status: &str, amount: Option<&str>) -> PaymentCallback {
    let mut raw = json!({ "tx_ref": tx_ref, "status": status });
    if let Some(amount) = amount {
        raw["amount"] = json!(amount);
    }
    PaymentCallback::from_value(raw).unwrap()
}

#[tokio::test]
async fn deposit_for_new_user_creates_active_etb_wallet() {
    let app = TestApp::new();
    app.pending("deposit-u1-1", "u1", dec!(500), TransactionType::Deposit, None)
        .await;

    let outcome = app
        .reconciler()
        .reconcile(&callback("deposit-u1-1", "success", Some("500")))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let wallet = app.store.find_wallet("u1").await.unwrap().expect("wallet created");
    assert_eq!(wallet.balance, dec!(500));
    assert_eq!(wallet.currency, "ETB");
    assert_eq!(wallet.status, WalletStatus::Active);

    let transaction = app.store.find_transaction("deposit-u1-1").await.unwrap().unwrap();
    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert!(transaction.completed_at.is_some());
    assert_eq!(transaction.gateway_payload.unwrap()["status"], "success");
}

#[tokio::test]
async fn duplicate_deposit_callback_credits_once() {
    let app = TestApp::new();
    app.wallet("u2", dec!(100), WalletStatus::Active).await;
    app.pending("deposit-u2-1", "u2", dec!(50), TransactionType::Deposit, None)
        .await;

    let cb = callback("deposit-u2-1", "success", Some("50"));
    let first = app.reconciler().reconcile(&cb).await.unwrap();
    let second = app.reconciler().reconcile(&cb).await.unwrap();

    assert_eq!(first, ReconcileOutcome::Applied);
    assert_eq!(second, ReconcileOutcome::Duplicate);

    let store = app.finish().await;
    let wallet = store.find_wallet("u2").await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(150));

    // One deposit revenue entry, not two
    let today = Utc::now().date_naive();
    let entries = store.revenue_entries_on(today).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, RevenueType::Deposit);
    assert_eq!(entries[0].amount, dec!(50));
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_apply_exactly_once() {
    let app = TestApp::new();
    app.pending("deposit-u3-1", "u3", dec!(75), TransactionType::Deposit, None)
        .await;

    let mut handles = vec![];
    for _ in 0..10 {
        let reconciler = app.reconciler().clone();
        handles.push(tokio::spawn(async move {
            reconciler
                .reconcile(&callback("deposit-u3-1", "success", Some("75")))
                .await
        }));
    }

    let outcomes: Vec<ReconcileOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let applied = outcomes
        .iter()
        .filter(|o| **o == ReconcileOutcome::Applied)
        .count();
    assert_eq!(applied, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ReconcileOutcome::Applied | ReconcileOutcome::Duplicate)));

    let wallet = app.store.find_wallet("u3").await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(75));
}

#[tokio::test]
async fn unknown_reference_changes_nothing() {
    let app = TestApp::new();

    let outcome = app
        .reconciler()
        .reconcile(&callback("deposit-ghost-1", "success", Some("500")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::NotFound);
    assert!(app.store.find_wallet("ghost").await.unwrap().is_none());
    assert!(app.store.find_transaction("deposit-ghost-1").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_status_leaves_transaction_pending() {
    let app = TestApp::new();
    app.pending("deposit-u4-1", "u4", dec!(20), TransactionType::Deposit, None)
        .await;

    let outcome = app
        .reconciler()
        .reconcile(&callback("deposit-u4-1", "failed", Some("20")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Ignored);
    let transaction = app.store.find_transaction("deposit-u4-1").await.unwrap().unwrap();
    assert_eq!(transaction.status, TransactionStatus::Pending);
    assert!(app.store.find_wallet("u4").await.unwrap().is_none());
}

#[tokio::test]
async fn callback_without_amount_uses_recorded_amount() {
    let app = TestApp::new();
    app.pending("deposit-u5-1", "u5", dec!(42.50), TransactionType::Deposit, None)
        .await;

    let outcome = app
        .reconciler()
        .reconcile(&callback("deposit-u5-1", "success", None))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied);
    let wallet = app.store.find_wallet("u5").await.unwrap().unwrap();
    assert_eq!(wallet.balance, dec!(42.50));
}

#[tokio::test]
async fn game_entry_callback_splits_fee_into_prize_pool() {
    let app = TestApp::new();
    app.game("room-1", dec!(100)).await;
    app.pending(
        "bingo-entry-1",
        "u6",
        dec!(100),
        TransactionType::GameEntry,
        Some("room-1"),
    )
    .await;

    let outcome = app
        .reconciler()
        .reconcile(&callback("bingo-entry-1", "success", Some("100")))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let store = app.finish().await;
    let game = store.find_game("room-1").await.unwrap().unwrap();
    assert_eq!(game.prize_pool, dec!(90));

    let entries = store.revenue_entries_on(Utc::now().date_naive()).await.unwrap();
    assert_eq!(entries.len(), 2);
    let commission = entries
        .iter()
        .find(|e| e.entry_type == RevenueType::HouseCommission)
        .unwrap();
    let prize = entries
        .iter()
        .find(|e| e.entry_type == RevenueType::PrizePool)
        .unwrap();
    assert_eq!(commission.amount, dec!(10));
    assert_eq!(prize.amount, dec!(90));
    assert_eq!(commission.amount + prize.amount, dec!(100));
    assert!(entries.iter().all(|e| e.user_id == "u6" && e.tx_ref == "bingo-entry-1"));

    // No wallet is touched by a gateway-paid entry
    assert!(store.find_wallet("u6").await.unwrap().is_none());
}

#[tokio::test]
async fn withdrawal_callback_only_closes_the_record() {
    let app = TestApp::new();
    app.wallet("u7", dec!(300), WalletStatus::Active).await;
    app.pending("WTH-u7-1", "u7", dec!(100), TransactionType::Withdrawal, None)
        .await;

    let outcome = app
        .reconciler()
        .reconcile(&callback("WTH-u7-1", "success", Some("100")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied);
    let store = app.finish().await;
    assert_eq!(
        store.find_transaction("WTH-u7-1").await.unwrap().unwrap().status,
        TransactionStatus::Completed
    );
    assert_eq!(store.find_wallet("u7").await.unwrap().unwrap().balance, dec!(300));
    assert!(store
        .revenue_entries_on(Utc::now().date_naive())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn entry_fee_processing_is_idempotent_per_reference() {
    let app = TestApp::new();
    app.game("room-2", dec!(50)).await;
    let service = RevenueService::new(app.state.store.clone());

    let first = service
        .process_entry_fee("u8", "room-2", dec!(50), "ref-1")
        .await
        .unwrap();
    service
        .process_entry_fee("u8", "room-2", dec!(50), "ref-1")
        .await
        .unwrap();

    assert_eq!(first.house_commission, dec!(5));
    assert_eq!(first.prize_pool_addition, dec!(45));

    let game = app.store.find_game("room-2").await.unwrap().unwrap();
    assert_eq!(game.prize_pool, dec!(45));
    let summary = app
        .store
        .daily_summary(Utc::now().date_naive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.total_amount, dec!(50));
    assert_eq!(summary.transaction_count, 2);
}

#[tokio::test]
async fn failed_entry_fee_booking_is_repaired_by_retry() {
    let store = Arc::new(FlakyLedger::failing(1));
    store
        .create_game(NewGameRoom {
            game_id: "room-9".to_string(),
            entry_fee: dec!(100),
        })
        .await
        .unwrap();
    let service = RevenueService::new(store.clone());

    let first = service
        .process_entry_fee("u20", "room-9", dec!(100), "bingo-ref-9")
        .await;
    assert!(first.is_err());

    // Nothing from the failed attempt may survive
    let today = Utc::now().date_naive();
    assert!(store.revenue_entries_on(today).await.unwrap().is_empty());
    assert_eq!(
        store.find_game("room-9").await.unwrap().unwrap().prize_pool,
        Decimal::ZERO
    );

    service
        .process_entry_fee("u20", "room-9", dec!(100), "bingo-ref-9")
        .await
        .unwrap();
    service
        .process_entry_fee("u20", "room-9", dec!(100), "bingo-ref-9")
        .await
        .unwrap();

    let game = store.find_game("room-9").await.unwrap().unwrap();
    assert_eq!(game.prize_pool, dec!(90));

    let entries = store.revenue_entries_on(today).await.unwrap();
    assert_eq!(entries.len(), 2);
    let pool_rows: Decimal = entries
        .iter()
        .filter(|e| e.entry_type == RevenueType::PrizePool)
        .map(|e| e.amount)
        .sum();
    assert_eq!(pool_rows, game.prize_pool);

    let breakdown = analytics::daily_breakdown(store.as_ref(), today).await.unwrap();
    assert!(breakdown.consistent);
}

#[tokio::test]
async fn entry_fee_for_missing_room_fails_without_revenue() {
    let app = TestApp::new();
    let service = RevenueService::new(app.state.store.clone());

    let result = service
        .process_entry_fee("u9", "no-such-room", dec!(100), "ref-2")
        .await;

    assert!(matches!(result, Err(RelayError::GameNotFound(_))));
    assert!(app
        .store
        .revenue_entries_on(Utc::now().date_naive())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn record_revenue_deduplicates_type_and_reference() {
    let app = TestApp::new();
    let service = RevenueService::new(app.state.store.clone());

    assert!(service
        .record_revenue(RevenueType::Deposit, dec!(200), "u10", "deposit-u10-1")
        .await
        .unwrap());
    assert!(!service
        .record_revenue(RevenueType::Deposit, dec!(200), "u10", "deposit-u10-1")
        .await
        .unwrap());
    // Same reference, different type, is a separate entry
    assert!(service
        .record_revenue(RevenueType::HouseCommission, dec!(20), "u10", "deposit-u10-1")
        .await
        .unwrap());

    let summary = app
        .store
        .daily_summary(Utc::now().date_naive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.total_amount, dec!(220));
    assert_eq!(summary.transaction_count, 2);
}

#[tokio::test]
async fn paid_join_deducts_fee_and_splits_it() {
    let app = TestApp::new();
    app.game("room-3", dec!(100)).await;
    app.wallet("u11", dec!(250), WalletStatus::Active).await;

    let receipt = games::join_game_with_payment(
        app.store.as_ref(),
        "room-3",
        "u11",
        json!({ "userId": "u11", "name": "Almaz" }),
    )
    .await
    .unwrap();

    let transaction = receipt.transaction.expect("paid join records a transaction");
    assert!(transaction.tx_ref.starts_with("game-entry-u11-room-3-"));
    assert_eq!(transaction.tx_type, TransactionType::GameEntry);
    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert_eq!(transaction.amount, dec!(100));

    assert_eq!(app.store.find_wallet("u11").await.unwrap().unwrap().balance, dec!(150));

    let game = app.store.find_game("room-3").await.unwrap().unwrap();
    assert_eq!(game.prize_pool, dec!(90));
    assert_eq!(game.players, json!([{ "userId": "u11", "name": "Almaz" }]));

    let entries = app
        .store
        .revenue_entries_on(transaction.created_at.date_naive())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.tx_ref == transaction.tx_ref));
}

#[tokio::test]
async fn join_with_insufficient_balance_changes_nothing() {
    let app = TestApp::new();
    app.game("room-4", dec!(100)).await;
    app.wallet("u12", dec!(99.99), WalletStatus::Active).await;

    let result =
        games::join_game_with_payment(app.store.as_ref(), "room-4", "u12", json!({ "userId": "u12" }))
            .await;

    match result {
        Err(RelayError::InsufficientFunds {
            required,
            available,
        }) => {
            assert_eq!(required, dec!(100));
            assert_eq!(available, dec!(99.99));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    assert_eq!(app.store.find_wallet("u12").await.unwrap().unwrap().balance, dec!(99.99));
    let game = app.store.find_game("room-4").await.unwrap().unwrap();
    assert_eq!(game.prize_pool, Decimal::ZERO);
    assert_eq!(game.player_count(), 0);
    assert!(app
        .store
        .revenue_entries_on(Utc::now().date_naive())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn join_without_wallet_is_insufficient_funds() {
    let app = TestApp::new();
    app.game("room-5", dec!(10)).await;

    let result =
        games::join_game_with_payment(app.store.as_ref(), "room-5", "nobody", json!({})).await;

    assert!(matches!(
        result,
        Err(RelayError::InsufficientFunds { available, .. }) if available == Decimal::ZERO
    ));
}

#[tokio::test]
async fn suspended_wallet_cannot_pay_entry_fees() {
    let app = TestApp::new();
    app.game("room-6", dec!(10)).await;
    app.wallet("u13", dec!(1000), WalletStatus::Suspended).await;

    let result =
        games::join_game_with_payment(app.store.as_ref(), "room-6", "u13", json!({})).await;

    assert!(matches!(result, Err(RelayError::WalletSuspended(_))));
    assert_eq!(app.store.find_wallet("u13").await.unwrap().unwrap().balance, dec!(1000));
}

#[tokio::test]
async fn free_join_appends_player_without_payment() {
    let app = TestApp::new();
    app.game("room-7", Decimal::ZERO).await;

    let receipt = games::join_game_with_payment(
        app.store.as_ref(),
        "room-7",
        "u14",
        json!({ "userId": "u14" }),
    )
    .await
    .unwrap();

    assert!(receipt.transaction.is_none());
    assert_eq!(receipt.game.player_count(), 1);
    assert!(app.store.find_wallet("u14").await.unwrap().is_none());

    // The same player joining twice is appended twice
    games::join_game_with_payment(app.store.as_ref(), "room-7", "u14", json!({ "userId": "u14" }))
        .await
        .unwrap();
    assert_eq!(app.store.find_game("room-7").await.unwrap().unwrap().player_count(), 2);
}

#[tokio::test]
async fn join_unknown_room_is_not_found() {
    let app = TestApp::new();
    let result =
        games::join_game_with_payment(app.store.as_ref(), "missing", "u15", json!({})).await;
    assert!(matches!(result, Err(RelayError::GameNotFound(id)) if id == "missing"));
}

#[tokio::test]
async fn daily_summary_matches_revenue_log() {
    let app = TestApp::new();
    app.game("room-8", dec!(33.33)).await;
    app.wallet("u16", dec!(100), WalletStatus::Active).await;
    app.pending("deposit-u17-1", "u17", dec!(500), TransactionType::Deposit, None)
        .await;

    app.reconciler()
        .reconcile(&callback("deposit-u17-1", "success", Some("500")))
        .await
        .unwrap();
    games::join_game_with_payment(app.store.as_ref(), "room-8", "u16", json!({ "userId": "u16" }))
        .await
        .unwrap();

    let store = app.finish().await;
    let ledger: Arc<dyn LedgerStore> = store;
    let today = Utc::now().date_naive();

    let breakdown = analytics::daily_breakdown(ledger.as_ref(), today).await.unwrap();
    assert!(breakdown.consistent);
    assert_eq!(breakdown.entries.len(), 3);
    assert_eq!(breakdown.ledger_total, dec!(533.33));
    assert_eq!(breakdown.by_type["deposit"], dec!(500));
    assert_eq!(breakdown.by_type["house_commission"], dec!(3.33));
    assert_eq!(breakdown.by_type["prize_pool"], dec!(30.00));

    let report = analytics::revenue_report(ledger.as_ref(), today, 30).await.unwrap();
    assert_eq!(report.total_revenue, dec!(533.33));
    assert_eq!(report.transaction_count, 3);
    assert_eq!(report.daily_revenue.len(), 1);
}
