use crate::errors::RelayResult;
use crate::models::{RevenueEntry, RevenueType, CURRENCY_DECIMALS};
use crate::store::LedgerStore;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Platform share of every entry fee.
pub const HOUSE_COMMISSION_RATE: Decimal = dec!(0.10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub house_commission: Decimal,
    pub prize_pool_addition: Decimal,
}

/// Split an entry fee into house commission and prize-pool share.
///
/// The commission is rounded to the currency unit and the prize share is
/// the remainder, so the two parts always add back up to `amount`.
pub fn split_entry_fee(amount: Decimal) -> FeeSplit {
    let house_commission = (amount * HOUSE_COMMISSION_RATE).round_dp(CURRENCY_DECIMALS);
    FeeSplit {
        house_commission,
        prize_pool_addition: amount - house_commission,
    }
}

/// Revenue bookkeeping on top of the ledger store
#[derive(Clone)]
pub struct RevenueService {
    store: Arc<dyn LedgerStore>,
}

impl RevenueService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Append a revenue entry and bump today's summary. Returns `false` when
    /// the same `(entry_type, tx_ref)` was already recorded.
    pub async fn record_revenue(
        &self,
        entry_type: RevenueType,
        amount: Decimal,
        user_id: &str,
        tx_ref: &str,
    ) -> RelayResult<bool> {
        let entry = RevenueEntry::new(entry_type, amount, user_id, tx_ref, Utc::now());
        let inserted = self.store.record_revenue(entry).await?;

        if inserted {
            tracing::info!(
                entry_type = %entry_type,
                amount = %amount,
                user_id = %user_id,
                tx_ref = %tx_ref,
                "Revenue recorded"
            );
        } else {
            tracing::info!(
                entry_type = %entry_type,
                tx_ref = %tx_ref,
                "Revenue already recorded, skipping (idempotent)"
            );
        }

        Ok(inserted)
    }

    /// Split an entry fee paid through the gateway and book both halves.
    ///
    /// The store applies the pool increment and both revenue rows as one
    /// unit keyed by `tx_ref`, so a repeated job is harmless and a failed one
    /// leaves nothing behind to block the retry.
    pub async fn process_entry_fee(
        &self,
        user_id: &str,
        game_id: &str,
        amount: Decimal,
        tx_ref: &str,
    ) -> RelayResult<FeeSplit> {
        let split = split_entry_fee(amount);

        match self
            .store
            .apply_entry_fee(game_id, user_id, tx_ref, split, Utc::now())
            .await?
        {
            Some(game) => tracing::info!(
                game_id = %game_id,
                tx_ref = %tx_ref,
                house_commission = %split.house_commission,
                prize_pool = %game.prize_pool,
                "Entry fee booked, prize pool increased"
            ),
            None => tracing::info!(
                game_id = %game_id,
                tx_ref = %tx_ref,
                "Entry fee already booked, skipping (idempotent)"
            ),
        }

        Ok(split)
    }

    pub async fn execute(&self, job: &RevenueJob) -> RelayResult<()> {
        match job {
            RevenueJob::Deposit {
                user_id,
                amount,
                tx_ref,
            } => {
                self.record_revenue(RevenueType::Deposit, *amount, user_id, tx_ref)
                    .await?;
            }
            RevenueJob::EntryFee {
                user_id,
                game_id,
                amount,
                tx_ref,
            } => {
                self.process_entry_fee(user_id, game_id, *amount, tx_ref)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Side bookkeeping that must not hold up a gateway callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevenueJob {
    Deposit {
        user_id: String,
        amount: Decimal,
        tx_ref: String,
    },
    EntryFee {
        user_id: String,
        game_id: String,
        amount: Decimal,
        tx_ref: String,
    },
}

impl RevenueJob {
    pub fn kind(&self) -> &'static str {
        match self {
            RevenueJob::Deposit { .. } => "deposit",
            RevenueJob::EntryFee { .. } => "entry_fee",
        }
    }

    pub fn tx_ref(&self) -> &str {
        match self {
            RevenueJob::Deposit { tx_ref, .. } | RevenueJob::EntryFee { tx_ref, .. } => tx_ref,
        }
    }
}

/// Sending side of the revenue worker; cheap to clone into handlers.
#[derive(Clone)]
pub struct RevenueHandle {
    sender: mpsc::Sender<RevenueJob>,
    failures: Arc<AtomicU64>,
}

impl RevenueHandle {
    pub async fn submit(&self, job: RevenueJob) {
        let kind = job.kind();
        let tx_ref = job.tx_ref().to_string();

        if self.sender.send(job).await.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                job = kind,
                tx_ref = %tx_ref,
                "Revenue worker is not running, job dropped"
            );
        }
    }

    /// Jobs that failed or could not be delivered since start-up.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Background task draining revenue jobs
///
/// Failures are logged with the job's reference and counted; they never
/// reach the request that produced the job.
pub struct RevenueWorker {
    receiver: mpsc::Receiver<RevenueJob>,
    service: RevenueService,
    failures: Arc<AtomicU64>,
}

impl RevenueWorker {
    /// Start the worker. It stops once every handle has been dropped and the
    /// queue is drained.
    pub fn spawn(service: RevenueService, capacity: usize) -> (RevenueHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let failures = Arc::new(AtomicU64::new(0));

        let worker = RevenueWorker {
            receiver,
            service,
            failures: Arc::clone(&failures),
        };
        let task = tokio::spawn(worker.run());

        (RevenueHandle { sender, failures }, task)
    }

    async fn run(mut self) {
        tracing::info!("Revenue worker started");

        while let Some(job) = self.receiver.recv().await {
            match self.service.execute(&job).await {
                Ok(()) => {
                    tracing::debug!(job = job.kind(), tx_ref = %job.tx_ref(), "Revenue job done");
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        job = job.kind(),
                        tx_ref = %job.tx_ref(),
                        error = %e,
                        "Revenue job failed"
                    );
                }
            }
        }

        tracing::info!("Revenue worker stopped");
    }
}
