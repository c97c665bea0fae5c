#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bingo_payment_relay::config::Settings;
use bingo_payment_relay::errors::{RelayError, RelayResult};
use bingo_payment_relay::gateway::{Checkout, CheckoutRequest, PaymentGateway};
use bingo_payment_relay::handlers::AppState;
use bingo_payment_relay::memory::MemoryLedgerStore;
use bingo_payment_relay::models::{
    DailyRevenueSummary, GameEntryReceipt, GameEntryRequest, GameRoom, GameStats, NewGameRoom,
    NewTransaction, RevenueEntry, Transaction, TransactionStatus, TransactionType, UserProfile,
    Wallet, WalletStatus, CURRENCY,
};
use bingo_payment_relay::reconciler::Reconciler;
use bingo_payment_relay::revenue::{FeeSplit, RevenueService, RevenueWorker};
use bingo_payment_relay::store::LedgerStore;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tower::ServiceExt;

#[derive(Debug, Clone)]
pub enum GatewayMode {
    Accept,
    Reject(String),
    Down,
}

/// Stand-in for the remote gateway
///
/// Records every initialize call together with the status the transaction
/// had in the ledger at the moment the gateway was called.
pub struct FakeGateway {
    store: Arc<MemoryLedgerStore>,
    mode: Mutex<GatewayMode>,
    pub calls: Mutex<Vec<(CheckoutRequest, Option<TransactionStatus>)>>,
}

impl FakeGateway {
    pub fn new(store: Arc<MemoryLedgerStore>) -> Self {
        Self {
            store,
            mode: Mutex::new(GatewayMode::Accept),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: GatewayMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize(&self, request: &CheckoutRequest) -> RelayResult<Checkout> {
        let seen = self
            .store
            .find_transaction(&request.tx_ref)
            .await?
            .map(|t| t.status);
        self.calls.lock().unwrap().push((request.clone(), seen));

        let mode = self.mode.lock().unwrap().clone();
        match mode {
            GatewayMode::Accept => Ok(Checkout {
                checkout_url: format!("https://checkout.chapa.test/pay/{}", request.tx_ref),
            }),
            GatewayMode::Reject(message) => Err(RelayError::Gateway(message)),
            GatewayMode::Down => Err(RelayError::GatewayUnavailable(
                "initialize request failed: connection refused".to_string(),
            )),
        }
    }

    async fn verify(&self, tx_ref: &str) -> RelayResult<Value> {
        Ok(json!({
            "message": "Payment details",
            "status": "success",
            "data": { "tx_ref": tx_ref, "currency": CURRENCY },
        }))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryLedgerStore>,
    pub gateway: Arc<FakeGateway>,
    worker: JoinHandle<()>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryLedgerStore::new());
        let gateway = Arc::new(FakeGateway::new(Arc::clone(&store)));
        let ledger: Arc<dyn LedgerStore> = store.clone();

        let (revenue, worker) = RevenueWorker::spawn(RevenueService::new(Arc::clone(&ledger)), 64);
        let settings = Settings::from_lookup(|key| match key {
            "CHAPA_SECRET_KEY" => Some("CHASECK_TEST-relay".to_string()),
            "PUBLIC_BASE_URL" => Some("https://relay.test".to_string()),
            _ => None,
        })
        .expect("test settings");

        let state = AppState {
            reconciler: Reconciler::new(Arc::clone(&ledger), revenue.clone()),
            store: ledger,
            gateway: gateway.clone(),
            revenue,
            settings: Arc::new(settings),
        };

        Self {
            state,
            store,
            gateway,
            worker,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.state.reconciler
    }

    pub fn router(&self) -> Router {
        bingo_payment_relay::app(self.state.clone())
    }

    /// Drop every revenue handle and wait until queued jobs are applied.
    pub async fn finish(self) -> Arc<MemoryLedgerStore> {
        let (state, store, worker) = self.into_parts();
        drop(state);
        worker.await.expect("revenue worker panicked");
        store
    }

    /// The state holds the only revenue handles, so whoever owns it decides
    /// when the worker may stop.
    pub fn into_parts(self) -> (AppState, Arc<MemoryLedgerStore>, JoinHandle<()>) {
        (self.state, self.store, self.worker)
    }

    pub async fn pending(&self, tx_ref: &str, user_id: &str, amount: Decimal, tx_type: TransactionType, game_id: Option<&str>) {
        self.store
            .insert_transaction(NewTransaction {
                tx_ref: tx_ref.to_string(),
                user_id: user_id.to_string(),
                amount,
                tx_type,
                game_id: game_id.map(str::to_string),
            })
            .await
            .expect("insert pending transaction");
    }

    pub async fn game(&self, game_id: &str, entry_fee: Decimal) {
        self.store
            .create_game(NewGameRoom {
                game_id: game_id.to_string(),
                entry_fee,
            })
            .await
            .expect("create game");
    }

    pub async fn wallet(&self, user_id: &str, balance: Decimal, status: WalletStatus) {
        let now = Utc::now();
        self.store
            .put_wallet(Wallet {
                user_id: user_id.to_string(),
                balance,
                currency: CURRENCY.to_string(),
                status,
                created_at: now,
                updated_at: now,
            })
            .await;
    }

    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }
}

/// Memory ledger whose entry-fee booking fails a set number of times
/// before it starts delegating, as a dropped database connection would.
pub struct FlakyLedger {
    pub inner: MemoryLedgerStore,
    failures_left: AtomicUsize,
}

impl FlakyLedger {
    pub fn failing(times: usize) -> Self {
        Self {
            inner: MemoryLedgerStore::new(),
            failures_left: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn insert_transaction(&self, new: NewTransaction) -> RelayResult<Transaction> {
        self.inner.insert_transaction(new).await
    }

    async fn find_transaction(&self, tx_ref: &str) -> RelayResult<Option<Transaction>> {
        self.inner.find_transaction(tx_ref).await
    }

    async fn transition_transaction(
        &self,
        tx_ref: &str,
        next: TransactionStatus,
        payload: Option<Value>,
    ) -> RelayResult<Option<Transaction>> {
        self.inner.transition_transaction(tx_ref, next, payload).await
    }

    async fn complete_deposit(
        &self,
        tx_ref: &str,
        amount: Decimal,
        payload: Value,
    ) -> RelayResult<Option<Wallet>> {
        self.inner.complete_deposit(tx_ref, amount, payload).await
    }

    async fn find_wallet(&self, user_id: &str) -> RelayResult<Option<Wallet>> {
        self.inner.find_wallet(user_id).await
    }

    async fn create_game(&self, new: NewGameRoom) -> RelayResult<GameRoom> {
        self.inner.create_game(new).await
    }

    async fn find_game(&self, game_id: &str) -> RelayResult<Option<GameRoom>> {
        self.inner.find_game(game_id).await
    }

    async fn apply_entry_fee(
        &self,
        game_id: &str,
        user_id: &str,
        tx_ref: &str,
        split: FeeSplit,
        at: DateTime<Utc>,
    ) -> RelayResult<Option<GameRoom>> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RelayError::InternalError("connection reset".to_string()));
        }
        self.inner
            .apply_entry_fee(game_id, user_id, tx_ref, split, at)
            .await
    }

    async fn record_revenue(&self, entry: RevenueEntry) -> RelayResult<bool> {
        self.inner.record_revenue(entry).await
    }

    async fn settle_game_entry(&self, request: GameEntryRequest) -> RelayResult<GameEntryReceipt> {
        self.inner.settle_game_entry(request).await
    }

    async fn daily_summaries_since(
        &self,
        since: NaiveDate,
    ) -> RelayResult<Vec<DailyRevenueSummary>> {
        self.inner.daily_summaries_since(since).await
    }

    async fn daily_summary(&self, date: NaiveDate) -> RelayResult<Option<DailyRevenueSummary>> {
        self.inner.daily_summary(date).await
    }

    async fn revenue_entries_on(&self, date: NaiveDate) -> RelayResult<Vec<RevenueEntry>> {
        self.inner.revenue_entries_on(date).await
    }

    async fn game_stats(&self) -> RelayResult<GameStats> {
        self.inner.game_stats().await
    }

    async fn upsert_user(
        &self,
        user_id: &str,
        phone: Option<String>,
        telegram: Option<String>,
    ) -> RelayResult<UserProfile> {
        self.inner.upsert_user(user_id, phone, telegram).await
    }
}
