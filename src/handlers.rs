use crate::analytics::{self, DailyBreakdown, RevenueReport, REPORT_WINDOW_DAYS};
use crate::config::Settings;
use crate::errors::{RelayError, RelayResult};
use crate::gateway::{Checkout, CheckoutRequest, Customization, PaymentGateway};
use crate::games;
use crate::models::*;
use crate::reconciler::Reconciler;
use crate::revenue::RevenueHandle;
use crate::store::LedgerStore;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Application state shared across handlers
///
/// Built once in `main`; every collaborator is injected here rather than
/// reached through a global.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub reconciler: Reconciler,
    pub revenue: RevenueHandle,
    pub settings: Arc<Settings>,
}

fn required(value: Option<String>, field: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => v,
        None => {
            missing.push(field);
            String::new()
        }
    }
}

fn reject_missing(missing: Vec<&'static str>) -> RelayResult<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RelayError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Ask the gateway for a checkout; a recorded pending transaction is failed
/// if the gateway refuses or cannot be reached.
async fn start_checkout(
    state: &AppState,
    request: &CheckoutRequest,
    recorded: bool,
) -> RelayResult<Checkout> {
    match state.gateway.initialize(request).await {
        Ok(checkout) => Ok(checkout),
        Err(e) => {
            tracing::warn!(tx_ref = %request.tx_ref, error = %e, "Gateway initialization failed");
            if recorded {
                let failed = state
                    .store
                    .transition_transaction(
                        &request.tx_ref,
                        TransactionStatus::Failed,
                        Some(json!({ "error": e.to_string() })),
                    )
                    .await;
                if let Err(store_err) = failed {
                    tracing::error!(
                        tx_ref = %request.tx_ref,
                        error = %store_err,
                        "Could not mark transaction as failed"
                    );
                }
            }
            Err(e)
        }
    }
}

/// Initialize a generic gateway payment
///
/// When the caller names both a user and a game, a pending `game_entry`
/// transaction is recorded so the callback can credit the prize pool.
pub async fn create_payment(
    State(state): State<AppState>,
    payload: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> RelayResult<Json<CheckoutResponse>> {
    let Json(payload) = payload?;

    let amount = match payload.amount {
        Some(amount) if amount > Decimal::ZERO => amount,
        _ => {
            return Err(RelayError::Validation(
                "Amount must be a positive number".to_string(),
            ))
        }
    };
    ensure_santim(amount)?;
    let tx_ref = format!("bingo-{}", uuid::Uuid::new_v4());

    let mut recorded = false;
    if let (Some(user_id), Some(game_id)) = (&payload.user_id, &payload.game_id) {
        if state.store.find_game(game_id).await?.is_none() {
            return Err(RelayError::GameNotFound(game_id.clone()));
        }
        state
            .store
            .insert_transaction(NewTransaction {
                tx_ref: tx_ref.clone(),
                user_id: user_id.clone(),
                amount,
                tx_type: TransactionType::GameEntry,
                game_id: Some(game_id.clone()),
            })
            .await?;
        recorded = true;
    }

    let request = CheckoutRequest {
        amount,
        currency: CURRENCY.to_string(),
        email: payload.email.unwrap_or_default(),
        first_name: payload.first_name.unwrap_or_default(),
        last_name: payload.last_name.unwrap_or_default(),
        phone_number: None,
        tx_ref: tx_ref.clone(),
        callback_url: state.settings.callback_url(),
        return_url: state.settings.return_url("payment-complete"),
        customization: Customization {
            title: "Bingo Game".to_string(),
            description: "Entry Fee".to_string(),
        },
    };

    let checkout = start_checkout(&state, &request, recorded).await?;

    Ok(Json(CheckoutResponse {
        checkout_url: checkout.checkout_url,
        tx_ref,
    }))
}

/// Initialize a wallet deposit
///
/// Flow:
/// 1. Validate every required field
/// 2. Record a pending deposit transaction
/// 3. Ask the gateway for a checkout URL
///
/// The wallet itself only changes when the gateway calls back.
pub async fn deposit(
    State(state): State<AppState>,
    payload: Result<Json<DepositRequest>, JsonRejection>,
) -> RelayResult<Json<CheckoutResponse>> {
    let Json(payload) = payload?;
    let deposit = payload.validate()?;

    let tx_ref = format!(
        "deposit-{}-{}",
        deposit.user_id,
        Utc::now().timestamp_millis()
    );

    tracing::info!(
        user_id = %deposit.user_id,
        amount = %deposit.amount,
        tx_ref = %tx_ref,
        "Initializing deposit"
    );

    state
        .store
        .insert_transaction(NewTransaction {
            tx_ref: tx_ref.clone(),
            user_id: deposit.user_id.clone(),
            amount: deposit.amount,
            tx_type: TransactionType::Deposit,
            game_id: None,
        })
        .await?;

    let request = CheckoutRequest {
        amount: deposit.amount,
        currency: CURRENCY.to_string(),
        email: deposit.email,
        first_name: deposit.first_name,
        last_name: deposit.last_name,
        phone_number: Some(deposit.phone),
        tx_ref: tx_ref.clone(),
        callback_url: state.settings.callback_url(),
        return_url: state.settings.return_url("wallet"),
        customization: Customization {
            title: "Deposit to Wallet".to_string(),
            description: "Deposit funds to your wallet".to_string(),
        },
    };

    let checkout = start_checkout(&state, &request, true).await?;

    Ok(Json(CheckoutResponse {
        checkout_url: checkout.checkout_url,
        tx_ref,
    }))
}

/// Withdrawal request acknowledgment; payouts are not processed yet.
pub async fn withdraw(
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> RelayResult<Json<Value>> {
    let Json(payload) = payload?;

    let mut missing = Vec::new();
    let user_id = required(payload.user_id, "userId", &mut missing);
    reject_missing(missing)?;

    tracing::info!(user_id = %user_id, amount = ?payload.amount, "Withdrawal requested");

    Ok(Json(json!({
        "success": true,
        "transactionId": format!("WTH-{}-{}", user_id, Utc::now().timestamp()),
        "status": "processing",
        "message": "Withdrawal request submitted successfully",
    })))
}

async fn handle_callback(state: &AppState, raw: Value) -> RelayResult<Json<Value>> {
    tracing::info!(payload = %raw, "Received gateway callback");

    let callback = PaymentCallback::from_value(raw)?;
    let outcome = state.reconciler.reconcile(&callback).await?;

    Ok(Json(json!({
        "message": "Payment callback processed",
        "outcome": outcome,
    })))
}

/// Gateway webhook delivered as a JSON body
pub async fn payment_callback_post(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> RelayResult<Json<Value>> {
    let Json(raw) = payload?;
    handle_callback(&state, raw).await
}

/// Gateway redirect/webhook delivered as a query string
pub async fn payment_callback_get(
    State(state): State<AppState>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> RelayResult<Json<Value>> {
    let Query(params) = query?;
    let raw = Value::Object(
        params
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    );
    handle_callback(&state, raw).await
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path(tx_ref): Path<String>,
) -> RelayResult<Json<Value>> {
    tracing::debug!(tx_ref = %tx_ref, "Verifying payment");

    let verification = state.gateway.verify(&tx_ref).await?;
    Ok(Json(verification))
}

pub async fn join_with_payment(
    State(state): State<AppState>,
    payload: Result<Json<JoinGameRequest>, JsonRejection>,
) -> RelayResult<Json<JoinGameResponse>> {
    let Json(payload) = payload?;

    let mut missing = Vec::new();
    let game_id = required(payload.game_id, "gameId", &mut missing);
    let user_id = required(payload.user_id, "userId", &mut missing);
    reject_missing(missing)?;

    let player_info = match payload.player_info {
        Value::Null => json!({ "userId": user_id }),
        info => info,
    };

    let receipt =
        games::join_game_with_payment(state.store.as_ref(), &game_id, &user_id, player_info)
            .await?;

    Ok(Json(JoinGameResponse {
        success: true,
        tx_ref: receipt.transaction.map(|t| t.tx_ref),
        prize_pool: receipt.game.prize_pool,
        player_count: receipt.game.player_count(),
    }))
}

pub async fn admin_revenue(State(state): State<AppState>) -> RelayResult<Json<RevenueReport>> {
    let today = Utc::now().date_naive();
    let report =
        analytics::revenue_report(state.store.as_ref(), today, REPORT_WINDOW_DAYS).await?;
    Ok(Json(report))
}

pub async fn admin_revenue_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> RelayResult<Json<DailyBreakdown>> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| RelayError::Validation(format!("Invalid date: {} (expected YYYY-MM-DD)", date)))?;

    let breakdown = analytics::daily_breakdown(state.store.as_ref(), date).await?;
    Ok(Json(breakdown))
}

pub async fn admin_game_stats(State(state): State<AppState>) -> RelayResult<Json<GameStats>> {
    let stats = state.store.game_stats().await?;
    Ok(Json(stats))
}

pub async fn admin_create_game(
    State(state): State<AppState>,
    payload: Result<Json<CreateGameRequest>, JsonRejection>,
) -> RelayResult<Json<GameRoom>> {
    let Json(payload) = payload?;
    let game = games::create_game(state.store.as_ref(), payload.game_id, payload.entry_fee).await?;
    Ok(Json(game))
}

pub async fn update_user(
    State(state): State<AppState>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> RelayResult<Json<Value>> {
    let Json(payload) = payload?;

    let mut missing = Vec::new();
    let user_id = required(payload.user_id, "userId", &mut missing);
    reject_missing(missing)?;

    state
        .store
        .upsert_user(&user_id, payload.phone, payload.telegram)
        .await?;
    tracing::info!(user_id = %user_id, "User profile updated");

    Ok(Json(json!({
        "success": true,
        "message": "User updated successfully",
    })))
}

/// Health check endpoint
///
/// Also reports how many background revenue jobs have failed since start.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "bingo-backend",
        "revenueFailures": state.revenue.failure_count(),
    }))
}

pub async fn api_test() -> Json<Value> {
    let now = Utc::now();
    Json(json!({
        "message": "API is working",
        "timestamp": now.timestamp_millis() as f64 / 1000.0,
    }))
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "service": "bingo-payment-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}
