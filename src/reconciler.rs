use crate::errors::RelayResult;
use crate::models::{PaymentCallback, Transaction, TransactionStatus, TransactionType};
use crate::revenue::{RevenueHandle, RevenueJob};
use crate::store::LedgerStore;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// What a callback did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The transaction moved out of `pending` and its mutation was applied.
    Applied,
    /// The transaction was already settled; nothing changed.
    Duplicate,
    /// The gateway reported something other than success.
    Ignored,
    /// No transaction carries this reference.
    NotFound,
}

/// Matches gateway callbacks to pending transactions
///
/// The balance mutation is tied to the `pending -> completed` compare-and-swap,
/// so however often the gateway delivers a callback the ledger moves once.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    revenue: RevenueHandle,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, revenue: RevenueHandle) -> Self {
        Self { store, revenue }
    }

    pub async fn reconcile(&self, callback: &PaymentCallback) -> RelayResult<ReconcileOutcome> {
        let tx_ref = match callback.tx_ref.as_deref().map(str::trim) {
            Some(tx_ref) if !tx_ref.is_empty() => tx_ref,
            _ => {
                tracing::warn!("Callback without a transaction reference");
                return Ok(ReconcileOutcome::NotFound);
            }
        };

        if !callback.is_success() {
            tracing::info!(
                tx_ref = %tx_ref,
                status = callback.status.as_deref().unwrap_or("<missing>"),
                "Callback is not a success, nothing to apply"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        let transaction = match self.store.find_transaction(tx_ref).await? {
            Some(transaction) => transaction,
            None => {
                tracing::warn!(tx_ref = %tx_ref, "Callback for unknown transaction");
                return Ok(ReconcileOutcome::NotFound);
            }
        };

        if transaction.status.is_terminal() {
            tracing::info!(
                tx_ref = %tx_ref,
                status = %transaction.status,
                "Transaction already settled, skipping (idempotent)"
            );
            return Ok(ReconcileOutcome::Duplicate);
        }

        let amount = settlement_amount(&transaction, callback.amount);

        let outcome = match transaction.tx_type {
            TransactionType::Deposit => self.settle_deposit(&transaction, amount, callback).await?,
            TransactionType::GameEntry => self.settle_game_entry(&transaction, amount, callback).await?,
            TransactionType::Withdrawal => {
                let settled = self
                    .store
                    .transition_transaction(
                        tx_ref,
                        TransactionStatus::Completed,
                        Some(callback.raw.clone()),
                    )
                    .await?;
                // Payouts are not handled here; the record is only closed.
                settled_or_duplicate(settled.is_some())
            }
        };

        if outcome == ReconcileOutcome::Duplicate {
            tracing::info!(tx_ref = %tx_ref, "Lost settlement race to a concurrent callback");
        }

        Ok(outcome)
    }

    async fn settle_deposit(
        &self,
        transaction: &Transaction,
        amount: Decimal,
        callback: &PaymentCallback,
    ) -> RelayResult<ReconcileOutcome> {
        let wallet = match self
            .store
            .complete_deposit(&transaction.tx_ref, amount, callback.raw.clone())
            .await?
        {
            Some(wallet) => wallet,
            None => return Ok(ReconcileOutcome::Duplicate),
        };

        tracing::info!(
            tx_ref = %transaction.tx_ref,
            user_id = %wallet.user_id,
            amount = %amount,
            new_balance = %wallet.balance,
            "Deposit settled"
        );

        self.revenue
            .submit(RevenueJob::Deposit {
                user_id: transaction.user_id.clone(),
                amount,
                tx_ref: transaction.tx_ref.clone(),
            })
            .await;

        Ok(ReconcileOutcome::Applied)
    }

    async fn settle_game_entry(
        &self,
        transaction: &Transaction,
        amount: Decimal,
        callback: &PaymentCallback,
    ) -> RelayResult<ReconcileOutcome> {
        let settled = self
            .store
            .transition_transaction(
                &transaction.tx_ref,
                TransactionStatus::Completed,
                Some(callback.raw.clone()),
            )
            .await?;
        if settled.is_none() {
            return Ok(ReconcileOutcome::Duplicate);
        }

        match &transaction.game_id {
            Some(game_id) => {
                tracing::info!(
                    tx_ref = %transaction.tx_ref,
                    game_id = %game_id,
                    amount = %amount,
                    "Game entry payment settled"
                );
                self.revenue
                    .submit(RevenueJob::EntryFee {
                        user_id: transaction.user_id.clone(),
                        game_id: game_id.clone(),
                        amount,
                        tx_ref: transaction.tx_ref.clone(),
                    })
                    .await;
            }
            None => {
                tracing::error!(
                    tx_ref = %transaction.tx_ref,
                    "Game entry transaction has no game id, prize pool not credited"
                );
            }
        }

        Ok(ReconcileOutcome::Applied)
    }
}

/// The callback's amount wins when it carries one; otherwise the amount
/// recorded at initiation is used.
fn settlement_amount(transaction: &Transaction, reported: Option<Decimal>) -> Decimal {
    match reported {
        Some(amount) if amount > Decimal::ZERO => {
            if amount != transaction.amount {
                tracing::warn!(
                    tx_ref = %transaction.tx_ref,
                    recorded = %transaction.amount,
                    reported = %amount,
                    "Callback amount differs from recorded amount"
                );
            }
            amount
        }
        _ => transaction.amount,
    }
}

fn settled_or_duplicate(settled: bool) -> ReconcileOutcome {
    if settled {
        ReconcileOutcome::Applied
    } else {
        ReconcileOutcome::Duplicate
    }
}
