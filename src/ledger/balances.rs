//! Balance initialization and arithmetic.
//!
//! The fold applied here is the single definition of how a transaction
//! moves a balance; both the incremental writer and the batch reconciler
//! go through it.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::models::{AccountingPeriod, Balance, BalanceTotals, NewBalance, TransactionType};
use crate::store::LedgerStore;

/// Season length used when the reconciler must invent a period window for a
/// balance it creates from history alone.
pub const SEASON_LENGTH_DAYS: i64 = 90;

/// Applies one transaction's magnitude to a set of totals. Add grows
/// `current_points` and `total_earned`; every other type shrinks
/// `current_points` and grows `total_spent`.
pub fn apply(totals: BalanceTotals, transaction_type: TransactionType, magnitude: i64) -> BalanceTotals {
    if transaction_type.is_earning() {
        BalanceTotals {
            current_points: totals.current_points + magnitude,
            total_earned: totals.total_earned + magnitude,
            total_spent: totals.total_spent,
        }
    } else {
        BalanceTotals {
            current_points: totals.current_points - magnitude,
            total_earned: totals.total_earned,
            total_spent: totals.total_spent + magnitude,
        }
    }
}

/// Derives a synthetic season window anchored at `now`: the season number is
/// the elapsed-since-epoch bucket, the window runs one season length forward.
pub fn season_window(now: DateTime<Utc>) -> (i64, DateTime<Utc>, DateTime<Utc>) {
    let number = now.timestamp() / (SEASON_LENGTH_DAYS * 86_400);
    (number, now, now + Duration::days(SEASON_LENGTH_DAYS))
}

/// Creates a zeroed balance for an account bound to the given period.
///
/// Not idempotent on its own: callers are expected to re-check for an
/// existing balance first (the writer does so at the top of every attempt,
/// under the per-account lock).
pub async fn ensure_balance(
    store: &dyn LedgerStore,
    account_id: &str,
    period: &AccountingPeriod,
) -> Result<Balance> {
    let new = NewBalance {
        account_id: account_id.to_string(),
        current_points: 0,
        total_earned: 0,
        total_spent: 0,
        season_id: period.id.clone(),
        season_number: period.number,
        starts_at: period.starts_at,
        ends_at: period.ends_at,
    };
    store.create_balance(&new).await
}
