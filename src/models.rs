use crate::errors::{RelayError, RelayResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// The only currency the relay handles.
pub const CURRENCY: &str = "ETB";

/// ETB is accounted to the santim.
pub const CURRENCY_DECIMALS: u32 = 2;

/// Reject amounts finer than the santim; the ledger columns cannot hold them.
pub fn ensure_santim(amount: Decimal) -> RelayResult<()> {
    if amount.normalize().scale() > CURRENCY_DECIMALS {
        return Err(RelayError::Validation(format!(
            "Amount {} has more than {} decimal places",
            amount, CURRENCY_DECIMALS
        )));
    }
    Ok(())
}

/// Payment transaction keyed by the gateway reference
///
/// Created `pending` when a payment is initiated and moved to a terminal
/// state exactly once, by a compare-and-swap on `status`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub tx_ref: String,
    pub user_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub game_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub gateway_payload: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    GameEntry,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::GameEntry => "game_entry",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle: `pending -> completed` or `pending -> failed`.
/// Both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User wallet, one per user id
///
/// `balance` is Decimal (never f64) and only moves through atomic
/// increments tied to a transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub user_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Suspended,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Suspended => "suspended",
        }
    }
}

/// A bingo room. `players` is a JSON array that only ever grows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRoom {
    pub game_id: String,
    pub entry_fee: Decimal,
    pub prize_pool: Decimal,
    pub players: Value,
    pub status: GameStatus,
    pub created_at: DateTime<Utc>,
}

impl GameRoom {
    pub fn player_count(&self) -> usize {
        self.players.as_array().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Playing,
    Completed,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Playing => "playing",
            GameStatus::Completed => "completed",
        }
    }
}

/// Append-only revenue log row
///
/// Unique per `(entry_type, tx_ref)`, so recording the same thing twice is
/// a no-op.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: RevenueType,
    pub amount: Decimal,
    pub user_id: String,
    pub tx_ref: String,
    pub created_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub month: String,
    pub year: i32,
}

impl RevenueEntry {
    pub fn new(
        entry_type: RevenueType,
        amount: Decimal,
        user_id: &str,
        tx_ref: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let date = at.date_naive();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entry_type,
            amount,
            user_id: user_id.to_string(),
            tx_ref: tx_ref.to_string(),
            created_at: at,
            date,
            month: format!("{:04}-{:02}", date.year(), date.month()),
            year: date.year(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RevenueType {
    Deposit,
    HouseCommission,
    PrizePool,
}

impl RevenueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueType::Deposit => "deposit",
            RevenueType::HouseCommission => "house_commission",
            RevenueType::PrizePool => "prize_pool",
        }
    }
}

impl std::fmt::Display for RevenueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Materialized per-day revenue aggregate
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRevenueSummary {
    pub date: NaiveDate,
    pub total_amount: Decimal,
    pub transaction_count: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub phone: Option<String>,
    pub telegram: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub active_games: i64,
    pub completed_games: i64,
    pub total_users: i64,
}

// === Store inputs ===

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tx_ref: String,
    pub user_id: String,
    pub amount: Decimal,
    pub tx_type: TransactionType,
    pub game_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewGameRoom {
    pub game_id: String,
    pub entry_fee: Decimal,
}

/// Everything the store needs to settle a paid (or free) game join in one
/// atomic unit.
#[derive(Debug, Clone)]
pub struct GameEntryRequest {
    pub game_id: String,
    pub user_id: String,
    pub player_info: Value,
    pub tx_ref: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GameEntryReceipt {
    /// `None` when the room is free to join.
    pub transaction: Option<Transaction>,
    pub game: GameRoom,
}

// === API Request/Response Models ===

/// Request to initialize a generic gateway payment
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Option<Decimal>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "gameId")]
    pub game_id: Option<String>,
}

/// Request to deposit into a wallet through the gateway
#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: Option<Decimal>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub phone: Option<String>,
}

/// A deposit request with every required field present
#[derive(Debug, Clone)]
pub struct ValidDeposit {
    pub amount: Decimal,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_id: String,
    pub phone: String,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl DepositRequest {
    /// Runs before anything is derived from the request.
    pub fn validate(self) -> RelayResult<ValidDeposit> {
        let amount = self.amount.filter(|a| !a.is_zero());
        let email = present(self.email);
        let first_name = present(self.first_name);
        let last_name = present(self.last_name);
        let user_id = present(self.user_id);
        let phone = present(self.phone);

        let missing: Vec<&str> = [
            ("amount", amount.is_none()),
            ("email", email.is_none()),
            ("first_name", first_name.is_none()),
            ("last_name", last_name.is_none()),
            ("userId", user_id.is_none()),
            ("phone", phone.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        match (amount, email, first_name, last_name, user_id, phone) {
            (Some(amount), Some(email), Some(first_name), Some(last_name), Some(user_id), Some(phone))
                if missing.is_empty() =>
            {
                if amount < Decimal::ZERO {
                    return Err(RelayError::Validation(
                        "Amount must be positive".to_string(),
                    ));
                }
                ensure_santim(amount)?;
                Ok(ValidDeposit {
                    amount,
                    email,
                    first_name,
                    last_name,
                    user_id,
                    phone,
                })
            }
            _ => Err(RelayError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub amount: Option<Decimal>,
}

/// Parsed gateway callback. Chapa names the reference `trx_ref` on its
/// redirect and `tx_ref` on webhooks, and may send both; `tx_ref` wins.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub tx_ref: Option<String>,
    #[serde(rename = "trx_ref")]
    redirect_ref: Option<String>,
    pub status: Option<String>,
    pub amount: Option<Decimal>,
    #[serde(skip)]
    pub raw: Value,
}

impl PaymentCallback {
    pub fn from_value(raw: Value) -> RelayResult<Self> {
        let mut callback: PaymentCallback = serde_json::from_value(raw.clone())
            .map_err(|e| RelayError::Validation(format!("Invalid callback payload: {}", e)))?;
        callback.tx_ref =
            present(callback.tx_ref.take()).or_else(|| present(callback.redirect_ref.take()));
        callback.raw = raw;
        Ok(callback)
    }

    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinGameRequest {
    #[serde(rename = "gameId")]
    pub game_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "playerInfo", default)]
    pub player_info: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    #[serde(rename = "gameId")]
    pub game_id: Option<String>,
    #[serde(rename = "entryFee")]
    pub entry_fee: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub phone: Option<String>,
    pub telegram: Option<String>,
}

/// Returned by both payment initiation routes
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub tx_ref: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameResponse {
    pub success: bool,
    pub tx_ref: Option<String>,
    pub prize_pool: Decimal,
    pub player_count: usize,
}
