use crate::errors::{RelayError, RelayResult};
use crate::models::{
    DailyRevenueSummary, GameEntryReceipt, GameEntryRequest, GameRoom, GameStats, NewGameRoom,
    NewTransaction, RevenueEntry, RevenueType, Transaction, TransactionStatus, TransactionType,
    UserProfile, Wallet, WalletStatus,
};
use crate::revenue::{split_entry_fee, FeeSplit};
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction as SqlTransaction};

/// PostgreSQL-backed ledger
///
/// All SQL lives here. Multi-row operations run inside one database
/// transaction and take row locks in a fixed order (game, then wallet).
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> RelayResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RelayError::InternalError(format!("Migration failed: {}", e)))
    }

    // === Helper methods for working within transactions ===

    async fn transition_in_tx(
        &self,
        tx: &mut SqlTransaction<'_, Postgres>,
        tx_ref: &str,
        next: TransactionStatus,
        payload: Option<&Value>,
    ) -> RelayResult<Option<Transaction>> {
        if !TransactionStatus::Pending.can_transition_to(next) {
            return Ok(None);
        }

        // The status guard in WHERE is the compare-and-swap.
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = $2,
                completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END,
                gateway_payload = COALESCE($3, gateway_payload)
            WHERE tx_ref = $1 AND status = 'pending'
            RETURNING tx_ref, user_id, amount, tx_type, status, game_id,
                      created_at, completed_at, gateway_payload
            "#,
        )
        .bind(tx_ref)
        .bind(next.as_str())
        .bind(payload)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(transaction)
    }

    /// Insert a revenue row and fold it into the daily summary.
    async fn record_revenue_in_tx(
        &self,
        tx: &mut SqlTransaction<'_, Postgres>,
        entry: &RevenueEntry,
    ) -> RelayResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO revenue_entries
                (id, entry_type, amount, user_id, tx_ref, created_at, date, month, year)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (entry_type, tx_ref) DO NOTHING
            "#,
        )
        .bind(&entry.id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount)
        .bind(&entry.user_id)
        .bind(&entry.tx_ref)
        .bind(entry.created_at)
        .bind(entry.date)
        .bind(&entry.month)
        .bind(entry.year)
        .execute(&mut **tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO daily_revenue (date, total_amount, transaction_count, last_updated)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (date) DO UPDATE
            SET total_amount = daily_revenue.total_amount + EXCLUDED.total_amount,
                transaction_count = daily_revenue.transaction_count + 1,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(entry.date)
        .bind(entry.amount)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(true)
    }

    /// Lock a wallet for update (prevents concurrent deductions)
    async fn lock_wallet_in_tx(
        &self,
        tx: &mut SqlTransaction<'_, Postgres>,
        user_id: &str,
    ) -> RelayResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT user_id, balance, currency, status, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(wallet)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_transaction(&self, new: NewTransaction) -> RelayResult<Transaction> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (tx_ref, user_id, amount, tx_type, status, game_id, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            RETURNING tx_ref, user_id, amount, tx_type, status, game_id,
                      created_at, completed_at, gateway_payload
            "#,
        )
        .bind(&new.tx_ref)
        .bind(&new.user_id)
        .bind(new.amount)
        .bind(new.tx_type.as_str())
        .bind(new.game_id.as_deref())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn find_transaction(&self, tx_ref: &str) -> RelayResult<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT tx_ref, user_id, amount, tx_type, status, game_id,
                   created_at, completed_at, gateway_payload
            FROM transactions
            WHERE tx_ref = $1
            "#,
        )
        .bind(tx_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn transition_transaction(
        &self,
        tx_ref: &str,
        next: TransactionStatus,
        payload: Option<Value>,
    ) -> RelayResult<Option<Transaction>> {
        let mut tx = self.pool.begin().await?;
        let transaction = self
            .transition_in_tx(&mut tx, tx_ref, next, payload.as_ref())
            .await?;
        tx.commit().await?;

        Ok(transaction)
    }

    async fn complete_deposit(
        &self,
        tx_ref: &str,
        amount: Decimal,
        payload: Value,
    ) -> RelayResult<Option<Wallet>> {
        let mut tx = self.pool.begin().await?;

        let transaction = match self
            .transition_in_tx(&mut tx, tx_ref, TransactionStatus::Completed, Some(&payload))
            .await?
        {
            Some(transaction) => transaction,
            None => return Ok(None),
        };

        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (user_id, balance, currency, status, created_at, updated_at)
            VALUES ($1, $2, 'ETB', 'active', NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET balance = wallets.balance + EXCLUDED.balance,
                updated_at = NOW()
            RETURNING user_id, balance, currency, status, created_at, updated_at
            "#,
        )
        .bind(&transaction.user_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(wallet))
    }

    async fn find_wallet(&self, user_id: &str) -> RelayResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT user_id, balance, currency, status, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn create_game(&self, new: NewGameRoom) -> RelayResult<GameRoom> {
        let game = sqlx::query_as::<_, GameRoom>(
            r#"
            INSERT INTO games (game_id, entry_fee, prize_pool, players, status, created_at)
            VALUES ($1, $2, 0, '[]'::jsonb, 'waiting', NOW())
            ON CONFLICT (game_id) DO NOTHING
            RETURNING game_id, entry_fee, prize_pool, players, status, created_at
            "#,
        )
        .bind(&new.game_id)
        .bind(new.entry_fee)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RelayError::Validation(format!("Game already exists: {}", new.game_id)))?;

        Ok(game)
    }

    async fn find_game(&self, game_id: &str) -> RelayResult<Option<GameRoom>> {
        let game = sqlx::query_as::<_, GameRoom>(
            r#"
            SELECT game_id, entry_fee, prize_pool, players, status, created_at
            FROM games
            WHERE game_id = $1
            "#,
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(game)
    }

    async fn apply_entry_fee(
        &self,
        game_id: &str,
        user_id: &str,
        tx_ref: &str,
        split: FeeSplit,
        at: DateTime<Utc>,
    ) -> RelayResult<Option<GameRoom>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT game_id FROM games WHERE game_id = $1 FOR UPDATE")
            .bind(game_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RelayError::GameNotFound(game_id.to_string()))?;

        // The prize_pool row marks the fee as booked.
        let prize = RevenueEntry::new(RevenueType::PrizePool, split.prize_pool_addition, user_id, tx_ref, at);
        if !self.record_revenue_in_tx(&mut tx, &prize).await? {
            return Ok(None);
        }
        let commission = RevenueEntry::new(
            RevenueType::HouseCommission,
            split.house_commission,
            user_id,
            tx_ref,
            at,
        );
        self.record_revenue_in_tx(&mut tx, &commission).await?;

        let game = sqlx::query_as::<_, GameRoom>(
            r#"
            UPDATE games
            SET prize_pool = prize_pool + $2
            WHERE game_id = $1
            RETURNING game_id, entry_fee, prize_pool, players, status, created_at
            "#,
        )
        .bind(game_id)
        .bind(split.prize_pool_addition)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(game))
    }

    async fn record_revenue(&self, entry: RevenueEntry) -> RelayResult<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = self.record_revenue_in_tx(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    /// Settle a game join in one database transaction
    ///
    /// Returning early with `?` drops `tx`, which rolls every write back.
    async fn settle_game_entry(&self, request: GameEntryRequest) -> RelayResult<GameEntryReceipt> {
        let mut tx = self.pool.begin().await?;

        let game = sqlx::query_as::<_, GameRoom>(
            r#"
            SELECT game_id, entry_fee, prize_pool, players, status, created_at
            FROM games
            WHERE game_id = $1
            FOR UPDATE
            "#,
        )
        .bind(&request.game_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RelayError::GameNotFound(request.game_id.clone()))?;

        let entry_fee = game.entry_fee;
        let transaction = if entry_fee > Decimal::ZERO {
            let wallet = self
                .lock_wallet_in_tx(&mut tx, &request.user_id)
                .await?
                .ok_or(RelayError::InsufficientFunds {
                    required: entry_fee,
                    available: Decimal::ZERO,
                })?;

            if wallet.status != WalletStatus::Active {
                return Err(RelayError::WalletSuspended(request.user_id.clone()));
            }
            if wallet.balance < entry_fee {
                return Err(RelayError::InsufficientFunds {
                    required: entry_fee,
                    available: wallet.balance,
                });
            }

            sqlx::query(
                r#"
                UPDATE wallets
                SET balance = balance - $2, updated_at = $3
                WHERE user_id = $1
                "#,
            )
            .bind(&request.user_id)
            .bind(entry_fee)
            .bind(request.at)
            .execute(&mut *tx)
            .await?;

            let transaction = sqlx::query_as::<_, Transaction>(
                r#"
                INSERT INTO transactions
                    (tx_ref, user_id, amount, tx_type, status, game_id, created_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                RETURNING tx_ref, user_id, amount, tx_type, status, game_id,
                          created_at, completed_at, gateway_payload
                "#,
            )
            .bind(&request.tx_ref)
            .bind(&request.user_id)
            .bind(entry_fee)
            .bind(TransactionType::GameEntry.as_str())
            .bind(TransactionStatus::Completed.as_str())
            .bind(&request.game_id)
            .bind(request.at)
            .fetch_one(&mut *tx)
            .await?;

            let split = split_entry_fee(entry_fee);
            sqlx::query("UPDATE games SET prize_pool = prize_pool + $2 WHERE game_id = $1")
                .bind(&request.game_id)
                .bind(split.prize_pool_addition)
                .execute(&mut *tx)
                .await?;

            for (entry_type, amount) in [
                (RevenueType::HouseCommission, split.house_commission),
                (RevenueType::PrizePool, split.prize_pool_addition),
            ] {
                let entry = RevenueEntry::new(
                    entry_type,
                    amount,
                    &request.user_id,
                    &request.tx_ref,
                    request.at,
                );
                self.record_revenue_in_tx(&mut tx, &entry).await?;
            }

            Some(transaction)
        } else {
            None
        };

        let game = sqlx::query_as::<_, GameRoom>(
            r#"
            UPDATE games
            SET players = players || jsonb_build_array($2::jsonb)
            WHERE game_id = $1
            RETURNING game_id, entry_fee, prize_pool, players, status, created_at
            "#,
        )
        .bind(&request.game_id)
        .bind(&request.player_info)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(GameEntryReceipt { transaction, game })
    }

    async fn daily_summaries_since(
        &self,
        since: NaiveDate,
    ) -> RelayResult<Vec<DailyRevenueSummary>> {
        let summaries = sqlx::query_as::<_, DailyRevenueSummary>(
            r#"
            SELECT date, total_amount, transaction_count, last_updated
            FROM daily_revenue
            WHERE date >= $1
            ORDER BY date DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(summaries)
    }

    async fn daily_summary(&self, date: NaiveDate) -> RelayResult<Option<DailyRevenueSummary>> {
        let summary = sqlx::query_as::<_, DailyRevenueSummary>(
            r#"
            SELECT date, total_amount, transaction_count, last_updated
            FROM daily_revenue
            WHERE date = $1
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(summary)
    }

    async fn revenue_entries_on(&self, date: NaiveDate) -> RelayResult<Vec<RevenueEntry>> {
        let entries = sqlx::query_as::<_, RevenueEntry>(
            r#"
            SELECT id, entry_type, amount, user_id, tx_ref, created_at, date, month, year
            FROM revenue_entries
            WHERE date = $1
            ORDER BY created_at
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn game_stats(&self) -> RelayResult<GameStats> {
        let (active_games, completed_games) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status IN ('waiting', 'playing')),
                COUNT(*) FILTER (WHERE status = 'completed')
            FROM games
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_users = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM (
                SELECT user_id FROM users
                UNION
                SELECT user_id FROM wallets
            ) AS known_users
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(GameStats {
            active_games,
            completed_games,
            total_users,
        })
    }

    async fn upsert_user(
        &self,
        user_id: &str,
        phone: Option<String>,
        telegram: Option<String>,
    ) -> RelayResult<UserProfile> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            INSERT INTO users (user_id, phone, telegram, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET phone = COALESCE(EXCLUDED.phone, users.phone),
                telegram = COALESCE(EXCLUDED.telegram, users.telegram),
                updated_at = NOW()
            RETURNING user_id, phone, telegram, updated_at
            "#,
        )
        .bind(user_id)
        .bind(phone)
        .bind(telegram)
        .fetch_one(&self.pool)
        .await?;

        Ok(profile)
    }
}
