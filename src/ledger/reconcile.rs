//! Batch reconciliation.
//!
//! Rebuilds every account's balance from the full approved-transaction log,
//! independent of the incrementally-maintained balances, and overwrites or
//! creates balance rows to match. Administrative trigger, not a hot path:
//! the whole log is paged into memory before folding.
//!
//! Accounts with no approved transactions are left untouched - with no
//! history there is no basis to overwrite.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{balances, LedgerError, LedgerService};
use crate::events;
use crate::models::{Balance, BalanceTotals, NewBalance, PointsTransaction, TransactionStatus};

const RECONCILE_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Updated,
    Created,
    Failed,
}

/// Per-account record of what the run did, including the audit trail of
/// transaction ids folded in encounter order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileDetail {
    pub account_id: String,
    pub action: ReconcileAction,
    pub current_points: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub transaction_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub processed: usize,
    pub updated: usize,
    pub created: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub summary: ReconcileSummary,
    pub details: Vec<ReconcileDetail>,
}

#[derive(Default)]
struct AccountFold {
    totals: BalanceTotals,
    transaction_ids: Vec<String>,
}

impl LedgerService {
    /// Recomputes every account's balance from approved history. Per-account
    /// failures are isolated into the report; only a page-fetch failure
    /// aborts the run.
    pub async fn reconcile(&self) -> Result<ReconcileReport, LedgerError> {
        let transactions = self.fetch_all_approved().await?;
        info!(
            count = transactions.len(),
            "Reconciliation: approved transaction log loaded"
        );

        let mut folds: HashMap<String, AccountFold> = HashMap::new();
        for txn in &transactions {
            let fold = folds.entry(txn.account_id.clone()).or_default();
            fold.totals = balances::apply(fold.totals, txn.transaction_type, txn.points);
            fold.transaction_ids.push(txn.id.clone());
        }

        let existing = self.fetch_all_balances().await?;
        let by_account: HashMap<String, Balance> = existing
            .into_iter()
            .map(|b| (b.account_id.clone(), b))
            .collect();

        let mut summary = ReconcileSummary::default();
        let mut details = Vec::with_capacity(folds.len());

        // Deterministic processing order makes runs comparable in the audit
        // log.
        let mut account_ids: Vec<&String> = folds.keys().collect();
        account_ids.sort();

        for account_id in account_ids {
            let fold = &folds[account_id];
            summary.processed += 1;

            let result = match by_account.get(account_id) {
                Some(balance) => self
                    .store
                    .update_balance_totals(&balance.id, &fold.totals)
                    .await
                    .map(|_| ReconcileAction::Updated),
                None => {
                    let now = Utc::now();
                    let (number, starts_at, ends_at) = balances::season_window(now);
                    let new = NewBalance {
                        account_id: account_id.clone(),
                        current_points: fold.totals.current_points,
                        total_earned: fold.totals.total_earned,
                        total_spent: fold.totals.total_spent,
                        season_id: format!("season-{number}"),
                        season_number: number,
                        starts_at,
                        ends_at,
                    };
                    self.store
                        .create_balance(&new)
                        .await
                        .map(|_| ReconcileAction::Created)
                }
            };

            match result {
                Ok(action) => {
                    match action {
                        ReconcileAction::Updated => summary.updated += 1,
                        ReconcileAction::Created => summary.created += 1,
                        ReconcileAction::Failed => {}
                    }
                    details.push(ReconcileDetail {
                        account_id: account_id.clone(),
                        action,
                        current_points: fold.totals.current_points,
                        total_earned: fold.totals.total_earned,
                        total_spent: fold.totals.total_spent,
                        transaction_ids: fold.transaction_ids.clone(),
                        error: None,
                    });
                }
                Err(e) => {
                    // One bad account must not block the batch.
                    warn!(account_id = %account_id, "Reconciliation failed for account: {}", e);
                    summary.errors += 1;
                    details.push(ReconcileDetail {
                        account_id: account_id.clone(),
                        action: ReconcileAction::Failed,
                        current_points: fold.totals.current_points,
                        total_earned: fold.totals.total_earned,
                        total_spent: fold.totals.total_spent,
                        transaction_ids: fold.transaction_ids.clone(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            processed = summary.processed,
            updated = summary.updated,
            created = summary.created,
            errors = summary.errors,
            "Reconciliation complete"
        );
        self.events.emit(
            events::RECONCILIATION_COMPLETED,
            serde_json::json!({
                "processed": summary.processed,
                "updated": summary.updated,
                "created": summary.created,
                "errors": summary.errors,
            }),
        );

        Ok(ReconcileReport { summary, details })
    }

    async fn fetch_all_approved(&self) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .store
                .list_transactions(Some(TransactionStatus::Approved), page, RECONCILE_PAGE_SIZE)
                .await
                .map_err(LedgerError::Store)?;
            let fetched = batch.items.len();
            all.extend(batch.items);
            if fetched == 0 || page >= batch.total_pages {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn fetch_all_balances(&self) -> Result<Vec<Balance>, LedgerError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .store
                .list_balances(page, RECONCILE_PAGE_SIZE)
                .await
                .map_err(LedgerError::Store)?;
            let fetched = batch.items.len();
            all.extend(batch.items);
            if fetched == 0 || page >= batch.total_pages {
                break;
            }
            page += 1;
        }
        Ok(all)
    }
}
