use crate::errors::{RelayError, RelayResult};
use crate::models::{
    DailyRevenueSummary, GameEntryReceipt, GameEntryRequest, GameRoom, GameStats, GameStatus,
    NewGameRoom, NewTransaction, RevenueEntry, RevenueType, Transaction, TransactionStatus,
    TransactionType, UserProfile, Wallet, WalletStatus, CURRENCY,
};
use crate::revenue::{split_entry_fee, FeeSplit};
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<String, Transaction>,
    wallets: HashMap<String, Wallet>,
    games: HashMap<String, GameRoom>,
    revenue: Vec<RevenueEntry>,
    summaries: BTreeMap<NaiveDate, DailyRevenueSummary>,
    users: HashMap<String, UserProfile>,
}

impl MemoryState {
    fn transition(
        &mut self,
        tx_ref: &str,
        next: TransactionStatus,
        payload: Option<Value>,
    ) -> Option<Transaction> {
        let transaction = self.transactions.get_mut(tx_ref)?;
        if !transaction.status.can_transition_to(next) {
            return None;
        }

        transaction.status = next;
        if next == TransactionStatus::Completed {
            transaction.completed_at = Some(Utc::now());
        }
        if payload.is_some() {
            transaction.gateway_payload = payload;
        }
        Some(transaction.clone())
    }

    fn apply_revenue(&mut self, entry: RevenueEntry) -> bool {
        let duplicate = self
            .revenue
            .iter()
            .any(|e| e.entry_type == entry.entry_type && e.tx_ref == entry.tx_ref);
        if duplicate {
            return false;
        }

        let summary = self
            .summaries
            .entry(entry.date)
            .or_insert_with(|| DailyRevenueSummary {
                date: entry.date,
                total_amount: Decimal::ZERO,
                transaction_count: 0,
                last_updated: entry.created_at,
            });
        summary.total_amount += entry.amount;
        summary.transaction_count += 1;
        summary.last_updated = entry.created_at;

        self.revenue.push(entry);
        true
    }
}

/// In-process ledger with the same atomicity as the Postgres store
///
/// One async mutex serialises every operation, so each trait method is a
/// single atomic unit. Used for local runs without a database and in tests.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a wallet directly.
    pub async fn put_wallet(&self, wallet: Wallet) {
        let mut state = self.state.lock().await;
        state.wallets.insert(wallet.user_id.clone(), wallet);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_transaction(&self, new: NewTransaction) -> RelayResult<Transaction> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&new.tx_ref) {
            return Err(RelayError::InternalError(format!(
                "Duplicate transaction reference: {}",
                new.tx_ref
            )));
        }

        let transaction = Transaction {
            tx_ref: new.tx_ref.clone(),
            user_id: new.user_id,
            amount: new.amount,
            tx_type: new.tx_type,
            status: TransactionStatus::Pending,
            game_id: new.game_id,
            created_at: Utc::now(),
            completed_at: None,
            gateway_payload: None,
        };
        state.transactions.insert(new.tx_ref, transaction.clone());
        Ok(transaction)
    }

    async fn find_transaction(&self, tx_ref: &str) -> RelayResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(tx_ref).cloned())
    }

    async fn transition_transaction(
        &self,
        tx_ref: &str,
        next: TransactionStatus,
        payload: Option<Value>,
    ) -> RelayResult<Option<Transaction>> {
        Ok(self.state.lock().await.transition(tx_ref, next, payload))
    }

    async fn complete_deposit(
        &self,
        tx_ref: &str,
        amount: Decimal,
        payload: Value,
    ) -> RelayResult<Option<Wallet>> {
        let mut state = self.state.lock().await;
        let transaction = match state.transition(tx_ref, TransactionStatus::Completed, Some(payload))
        {
            Some(transaction) => transaction,
            None => return Ok(None),
        };

        let now = Utc::now();
        let wallet = state
            .wallets
            .entry(transaction.user_id.clone())
            .and_modify(|w| {
                w.balance += amount;
                w.updated_at = now;
            })
            .or_insert_with(|| Wallet {
                user_id: transaction.user_id.clone(),
                balance: amount,
                currency: CURRENCY.to_string(),
                status: WalletStatus::Active,
                created_at: now,
                updated_at: now,
            });

        Ok(Some(wallet.clone()))
    }

    async fn find_wallet(&self, user_id: &str) -> RelayResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(user_id).cloned())
    }

    async fn create_game(&self, new: NewGameRoom) -> RelayResult<GameRoom> {
        let mut state = self.state.lock().await;
        if state.games.contains_key(&new.game_id) {
            return Err(RelayError::Validation(format!(
                "Game already exists: {}",
                new.game_id
            )));
        }

        let game = GameRoom {
            game_id: new.game_id.clone(),
            entry_fee: new.entry_fee,
            prize_pool: Decimal::ZERO,
            players: Value::Array(Vec::new()),
            status: GameStatus::Waiting,
            created_at: Utc::now(),
        };
        state.games.insert(new.game_id, game.clone());
        Ok(game)
    }

    async fn find_game(&self, game_id: &str) -> RelayResult<Option<GameRoom>> {
        Ok(self.state.lock().await.games.get(game_id).cloned())
    }

    async fn apply_entry_fee(
        &self,
        game_id: &str,
        user_id: &str,
        tx_ref: &str,
        split: FeeSplit,
        at: DateTime<Utc>,
    ) -> RelayResult<Option<GameRoom>> {
        let mut state = self.state.lock().await;
        if !state.games.contains_key(game_id) {
            return Err(RelayError::GameNotFound(game_id.to_string()));
        }

        let prize = RevenueEntry::new(RevenueType::PrizePool, split.prize_pool_addition, user_id, tx_ref, at);
        if !state.apply_revenue(prize) {
            return Ok(None);
        }
        state.apply_revenue(RevenueEntry::new(
            RevenueType::HouseCommission,
            split.house_commission,
            user_id,
            tx_ref,
            at,
        ));

        let game = state
            .games
            .get_mut(game_id)
            .ok_or_else(|| RelayError::GameNotFound(game_id.to_string()))?;
        game.prize_pool += split.prize_pool_addition;
        Ok(Some(game.clone()))
    }

    async fn record_revenue(&self, entry: RevenueEntry) -> RelayResult<bool> {
        Ok(self.state.lock().await.apply_revenue(entry))
    }

    async fn settle_game_entry(&self, request: GameEntryRequest) -> RelayResult<GameEntryReceipt> {
        let mut state = self.state.lock().await;

        // Every check happens before the first write.
        let entry_fee = state
            .games
            .get(&request.game_id)
            .map(|g| g.entry_fee)
            .ok_or_else(|| RelayError::GameNotFound(request.game_id.clone()))?;

        let paid = entry_fee > Decimal::ZERO;
        if paid {
            match state.wallets.get(&request.user_id) {
                None => {
                    return Err(RelayError::InsufficientFunds {
                        required: entry_fee,
                        available: Decimal::ZERO,
                    })
                }
                Some(wallet) if wallet.status != WalletStatus::Active => {
                    return Err(RelayError::WalletSuspended(request.user_id.clone()))
                }
                Some(wallet) if wallet.balance < entry_fee => {
                    return Err(RelayError::InsufficientFunds {
                        required: entry_fee,
                        available: wallet.balance,
                    })
                }
                Some(_) => {}
            }
            if state.transactions.contains_key(&request.tx_ref) {
                return Err(RelayError::InternalError(format!(
                    "Duplicate transaction reference: {}",
                    request.tx_ref
                )));
            }
        }

        let transaction = if paid {
            if let Some(wallet) = state.wallets.get_mut(&request.user_id) {
                wallet.balance -= entry_fee;
                wallet.updated_at = request.at;
            }

            let transaction = Transaction {
                tx_ref: request.tx_ref.clone(),
                user_id: request.user_id.clone(),
                amount: entry_fee,
                tx_type: TransactionType::GameEntry,
                status: TransactionStatus::Completed,
                game_id: Some(request.game_id.clone()),
                created_at: request.at,
                completed_at: Some(request.at),
                gateway_payload: None,
            };
            state
                .transactions
                .insert(request.tx_ref.clone(), transaction.clone());

            let split = split_entry_fee(entry_fee);
            if let Some(game) = state.games.get_mut(&request.game_id) {
                game.prize_pool += split.prize_pool_addition;
            }
            for (entry_type, amount) in [
                (RevenueType::HouseCommission, split.house_commission),
                (RevenueType::PrizePool, split.prize_pool_addition),
            ] {
                state.apply_revenue(RevenueEntry::new(
                    entry_type,
                    amount,
                    &request.user_id,
                    &request.tx_ref,
                    request.at,
                ));
            }

            Some(transaction)
        } else {
            None
        };

        let game = state
            .games
            .get_mut(&request.game_id)
            .ok_or_else(|| RelayError::GameNotFound(request.game_id.clone()))?;
        match game.players.as_array_mut() {
            Some(players) => players.push(request.player_info),
            None => game.players = Value::Array(vec![request.player_info]),
        }

        Ok(GameEntryReceipt {
            transaction,
            game: game.clone(),
        })
    }

    async fn daily_summaries_since(
        &self,
        since: NaiveDate,
    ) -> RelayResult<Vec<DailyRevenueSummary>> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .range(since..)
            .rev()
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn daily_summary(&self, date: NaiveDate) -> RelayResult<Option<DailyRevenueSummary>> {
        Ok(self.state.lock().await.summaries.get(&date).cloned())
    }

    async fn revenue_entries_on(&self, date: NaiveDate) -> RelayResult<Vec<RevenueEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .revenue
            .iter()
            .filter(|e| e.date == date)
            .cloned()
            .collect())
    }

    async fn game_stats(&self) -> RelayResult<GameStats> {
        let state = self.state.lock().await;
        let count = |wanted: &[GameStatus]| {
            state
                .games
                .values()
                .filter(|g| wanted.contains(&g.status))
                .count() as i64
        };
        let users: HashSet<&String> = state.users.keys().chain(state.wallets.keys()).collect();

        Ok(GameStats {
            active_games: count(&[GameStatus::Waiting, GameStatus::Playing]),
            completed_games: count(&[GameStatus::Completed]),
            total_users: users.len() as i64,
        })
    }

    async fn upsert_user(
        &self,
        user_id: &str,
        phone: Option<String>,
        telegram: Option<String>,
    ) -> RelayResult<UserProfile> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let profile = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile {
                user_id: user_id.to_string(),
                phone: None,
                telegram: None,
                updated_at: now,
            });
        if phone.is_some() {
            profile.phone = phone;
        }
        if telegram.is_some() {
            profile.telegram = telegram;
        }
        profile.updated_at = now;
        Ok(profile.clone())
    }
}
