use crate::errors::RelayResult;
use crate::models::{
    DailyRevenueSummary, GameEntryReceipt, GameEntryRequest, GameRoom, GameStats, NewGameRoom,
    NewTransaction, RevenueEntry, Transaction, TransactionStatus, UserProfile, Wallet,
};
use crate::revenue::FeeSplit;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// Everything the relay needs from its ledger
///
/// Each method is one atomic unit: implementations either apply all of its
/// writes or none. Balance and prize-pool changes are increments, never
/// read-modify-write from the caller's side.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record a new `pending` transaction.
    async fn insert_transaction(&self, new: NewTransaction) -> RelayResult<Transaction>;

    async fn find_transaction(&self, tx_ref: &str) -> RelayResult<Option<Transaction>>;

    /// Compare-and-swap `pending -> next`. Returns `None` if the transaction
    /// is missing or no longer pending.
    async fn transition_transaction(
        &self,
        tx_ref: &str,
        next: TransactionStatus,
        payload: Option<Value>,
    ) -> RelayResult<Option<Transaction>>;

    /// Complete a pending deposit and credit the owner's wallet by `amount`,
    /// creating the wallet if needed. Returns `None` without crediting when
    /// the transaction was not pending.
    async fn complete_deposit(
        &self,
        tx_ref: &str,
        amount: Decimal,
        payload: Value,
    ) -> RelayResult<Option<Wallet>>;

    async fn find_wallet(&self, user_id: &str) -> RelayResult<Option<Wallet>>;

    async fn create_game(&self, new: NewGameRoom) -> RelayResult<GameRoom>;

    async fn find_game(&self, game_id: &str) -> RelayResult<Option<GameRoom>>;

    /// Book a gateway-paid entry fee: both revenue rows and the prize-pool
    /// increment, all or nothing. Returns `None` without writing when
    /// `tx_ref` was already booked. Fails with `GameNotFound` when the room
    /// does not exist.
    async fn apply_entry_fee(
        &self,
        game_id: &str,
        user_id: &str,
        tx_ref: &str,
        split: FeeSplit,
        at: DateTime<Utc>,
    ) -> RelayResult<Option<GameRoom>>;

    /// Append a revenue entry and fold it into its day's summary. Returns
    /// `false` if an entry with the same type and reference already exists.
    async fn record_revenue(&self, entry: RevenueEntry) -> RelayResult<bool>;

    /// Entry-fee join: deduct, record, split, append player. All or nothing.
    async fn settle_game_entry(&self, request: GameEntryRequest) -> RelayResult<GameEntryReceipt>;

    async fn daily_summaries_since(&self, since: NaiveDate)
        -> RelayResult<Vec<DailyRevenueSummary>>;

    async fn daily_summary(&self, date: NaiveDate) -> RelayResult<Option<DailyRevenueSummary>>;

    async fn revenue_entries_on(&self, date: NaiveDate) -> RelayResult<Vec<RevenueEntry>>;

    async fn game_stats(&self) -> RelayResult<GameStats>;

    async fn upsert_user(
        &self,
        user_id: &str,
        phone: Option<String>,
        telegram: Option<String>,
    ) -> RelayResult<UserProfile>;
}
