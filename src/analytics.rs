use crate::errors::RelayResult;
use crate::models::{DailyRevenueSummary, RevenueEntry};
use crate::store::LedgerStore;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Days covered by the admin revenue report, today included.
pub const REPORT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub since: NaiveDate,
    pub daily_revenue: Vec<DailyRevenueSummary>,
    pub total_revenue: Decimal,
    pub transaction_count: i64,
}

/// Rolling report over the materialized daily summaries, newest day first.
pub async fn revenue_report(
    store: &dyn LedgerStore,
    today: NaiveDate,
    days: i64,
) -> RelayResult<RevenueReport> {
    let since = today - Duration::days(days.max(1) - 1);
    let daily_revenue = store.daily_summaries_since(since).await?;

    let total_revenue = daily_revenue.iter().map(|d| d.total_amount).sum();
    let transaction_count = daily_revenue.iter().map(|d| d.transaction_count).sum();

    Ok(RevenueReport {
        since,
        daily_revenue,
        total_revenue,
        transaction_count,
    })
}

/// One day's revenue log next to its aggregate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub summary: Option<DailyRevenueSummary>,
    pub entries: Vec<RevenueEntry>,
    pub by_type: BTreeMap<String, Decimal>,
    pub ledger_total: Decimal,
    /// Whether the summary matches the sum and count of the log.
    pub consistent: bool,
}

pub async fn daily_breakdown(store: &dyn LedgerStore, date: NaiveDate) -> RelayResult<DailyBreakdown> {
    let summary = store.daily_summary(date).await?;
    let entries = store.revenue_entries_on(date).await?;

    let mut by_type: BTreeMap<String, Decimal> = BTreeMap::new();
    for entry in &entries {
        *by_type.entry(entry.entry_type.to_string()).or_default() += entry.amount;
    }
    let ledger_total: Decimal = entries.iter().map(|e| e.amount).sum();

    let consistent = match &summary {
        Some(s) => s.total_amount == ledger_total && s.transaction_count == entries.len() as i64,
        None => entries.is_empty(),
    };
    if !consistent {
        tracing::warn!(
            date = %date,
            ledger_total = %ledger_total,
            summary_total = %summary.as_ref().map_or(Decimal::ZERO, |s| s.total_amount),
            "Daily revenue summary disagrees with the revenue log"
        );
    }

    Ok(DailyBreakdown {
        date,
        summary,
        entries,
        by_type,
        ledger_total,
        consistent,
    })
}
