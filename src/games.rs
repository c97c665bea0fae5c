use crate::errors::{RelayError, RelayResult};
use crate::models::{ensure_santim, GameEntryReceipt, GameEntryRequest, GameRoom, NewGameRoom};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// Reference for a wallet-funded game entry.
pub fn entry_tx_ref(user_id: &str, game_id: &str, at: DateTime<Utc>) -> String {
    format!("game-entry-{}-{}-{}", user_id, game_id, at.timestamp_millis())
}

/// Join a room, paying its entry fee from the player's wallet
///
/// Deduction, transaction record, prize split and player append are one
/// atomic store operation: on any error nothing has changed.
pub async fn join_game_with_payment(
    store: &dyn LedgerStore,
    game_id: &str,
    user_id: &str,
    player_info: Value,
) -> RelayResult<GameEntryReceipt> {
    let at = Utc::now();
    let request = GameEntryRequest {
        game_id: game_id.to_string(),
        user_id: user_id.to_string(),
        player_info,
        tx_ref: entry_tx_ref(user_id, game_id, at),
        at,
    };

    tracing::info!(game_id = %game_id, user_id = %user_id, "Joining game");

    let receipt = store.settle_game_entry(request).await?;

    match &receipt.transaction {
        Some(transaction) => tracing::info!(
            game_id = %game_id,
            user_id = %user_id,
            tx_ref = %transaction.tx_ref,
            entry_fee = %transaction.amount,
            prize_pool = %receipt.game.prize_pool,
            "Entry fee paid, player joined"
        ),
        None => tracing::info!(game_id = %game_id, user_id = %user_id, "Player joined free game"),
    }

    Ok(receipt)
}

pub async fn create_game(
    store: &dyn LedgerStore,
    game_id: Option<String>,
    entry_fee: Decimal,
) -> RelayResult<GameRoom> {
    if entry_fee < Decimal::ZERO {
        return Err(RelayError::Validation(
            "Entry fee cannot be negative".to_string(),
        ));
    }
    ensure_santim(entry_fee)?;

    let game_id = game_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let game = store.create_game(NewGameRoom { game_id, entry_fee }).await?;
    tracing::info!(game_id = %game.game_id, entry_fee = %game.entry_fee, "Game room created");

    Ok(game)
}
