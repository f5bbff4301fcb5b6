//! The two-step transaction + balance write.
//!
//! The pair is one logical operation against a store with no multi-document
//! transactions: transaction first, balance second, compensating delete if
//! the second write fails, then the whole lookup-compute-write sequence is
//! retried from scratch with exponential backoff. A crash between the two
//! writes leaves drift behind; the reconciler is the recovery mechanism for
//! that case.

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{balances, LedgerError, LedgerService};
use crate::events;
use crate::models::{
    AccountingPeriod, Balance, BalanceTotals, NewTransaction, PointsTransaction,
    TransactionStatus, TransactionType,
};

/// Caller input for one record operation. `points_change` is taken as a
/// magnitude: the sign is discarded and direction comes from
/// `transaction_type` alone.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub account_id: String,
    pub actor_id: String,
    pub points_change: i64,
    pub transaction_type: TransactionType,
    pub reason: String,
    pub gift_name: Option<String>,
    pub gift_points: Option<i64>,
    pub season_id: Option<String>,
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub transaction: PointsTransaction,
    pub balance: Balance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHistory {
    pub balance: Option<Balance>,
    pub transactions: Vec<PointsTransaction>,
}

/// Outcome of a single attempt: fatal errors surface immediately, transient
/// ones feed the retry loop.
enum AttemptError {
    Fatal(LedgerError),
    Transient(anyhow::Error),
}

impl LedgerService {
    /// Durably records one transaction and keeps the account's balance
    /// consistent with it.
    pub async fn record_transaction(
        &self,
        req: RecordRequest,
    ) -> Result<RecordOutcome, LedgerError> {
        let magnitude = req.points_change.abs();
        let client_ref = Uuid::new_v4().to_string();

        let lock = self.account_lock(&req.account_id);
        let _guard = lock.lock().await;

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before(attempt);
                debug!(
                    account_id = %req.account_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying ledger write"
                );
                sleep(delay).await;
            }

            match self.try_record(&req, magnitude, &client_ref).await {
                Ok(outcome) => {
                    self.events.emit(
                        events::BALANCE_UPDATED,
                        serde_json::json!({
                            "accountId": outcome.balance.account_id,
                            "transactionId": outcome.transaction.id,
                        }),
                    );
                    return Ok(outcome);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(e)) => {
                    warn!(
                        account_id = %req.account_id,
                        attempt,
                        "Ledger write attempt failed: {}", e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(LedgerError::WriteExhausted {
            attempts: self.retry.max_attempts,
            source: last_err
                .unwrap_or_else(|| anyhow::anyhow!("transaction/balance write pair failed")),
        })
    }

    /// One full lookup-resolve-compute-write pass. Re-run from scratch on
    /// every retry: account and balance state may have changed in between.
    async fn try_record(
        &self,
        req: &RecordRequest,
        magnitude: i64,
        client_ref: &str,
    ) -> Result<RecordOutcome, AttemptError> {
        self.sweep_leftovers(client_ref).await?;

        let account = self
            .store
            .get_account(&req.account_id)
            .await
            .map_err(AttemptError::Transient)?
            .ok_or_else(|| {
                AttemptError::Fatal(LedgerError::AccountNotFound(req.account_id.clone()))
            })?;

        let period = self.resolve_period(req.season_id.as_deref()).await?;

        let existing = self
            .store
            .get_balance_for_account(&account.id)
            .await
            .map_err(AttemptError::Transient)?;
        let balance = match existing {
            Some(balance) => balance,
            None => balances::ensure_balance(self.store.as_ref(), &account.id, &period)
                .await
                .map_err(AttemptError::Transient)?,
        };

        let totals = balances::apply(
            BalanceTotals::from(&balance),
            req.transaction_type,
            magnitude,
        );

        let new_txn = NewTransaction {
            account_id: account.id.clone(),
            actor_id: req.actor_id.clone(),
            points: magnitude,
            transaction_type: req.transaction_type,
            status: req.status.unwrap_or(TransactionStatus::Pending),
            reason: req.reason.clone(),
            gift_name: req.gift_name.clone(),
            gift_points: req.gift_points,
            season_id: period.id.clone(),
            client_ref: client_ref.to_string(),
        };
        let transaction = self
            .store
            .create_transaction(&new_txn)
            .await
            .map_err(AttemptError::Transient)?;

        match self.store.update_balance_totals(&balance.id, &totals).await {
            Ok(updated) => Ok(RecordOutcome {
                transaction,
                balance: updated,
            }),
            Err(e) => {
                // Compensating delete. Best-effort: a failure here is logged
                // and must not mask the original error - the next attempt's
                // sweep picks the row up by client_ref.
                if let Err(del_err) = self.store.delete_transaction(&transaction.id).await {
                    warn!(
                        transaction_id = %transaction.id,
                        "Compensating delete failed: {}", del_err
                    );
                }
                Err(AttemptError::Transient(e))
            }
        }
    }

    /// Removes any transaction left behind by an earlier attempt of the same
    /// logical operation (lost create response, failed compensating delete).
    async fn sweep_leftovers(&self, client_ref: &str) -> Result<(), AttemptError> {
        let leftovers = self
            .store
            .find_transactions_by_client_ref(client_ref)
            .await
            .map_err(AttemptError::Transient)?;
        for txn in leftovers {
            warn!(
                transaction_id = %txn.id,
                "Sweeping leftover transaction from earlier attempt"
            );
            if let Err(e) = self.store.delete_transaction(&txn.id).await {
                return Err(AttemptError::Transient(e));
            }
        }
        Ok(())
    }

    /// Resolves the accounting period once, at the operation boundary: an
    /// explicit season wins, otherwise the store's active period. No active
    /// period is a configuration error.
    async fn resolve_period(
        &self,
        season_id: Option<&str>,
    ) -> Result<AccountingPeriod, AttemptError> {
        match season_id {
            Some(id) => self
                .store
                .get_period(id)
                .await
                .map_err(AttemptError::Transient)?
                .ok_or_else(|| AttemptError::Fatal(LedgerError::SeasonNotFound(id.to_string()))),
            None => self
                .store
                .get_active_period()
                .await
                .map_err(AttemptError::Transient)?
                .ok_or(AttemptError::Fatal(LedgerError::NoActivePeriod)),
        }
    }

    /// Balance plus most recent transactions for one account.
    pub async fn account_history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<AccountHistory, LedgerError> {
        self.store
            .get_account(account_id)
            .await
            .map_err(LedgerError::Store)?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let balance = self
            .store
            .get_balance_for_account(account_id)
            .await
            .map_err(LedgerError::Store)?;
        let transactions = self
            .store
            .recent_transactions_for_account(account_id, limit)
            .await
            .map_err(LedgerError::Store)?;

        Ok(AccountHistory {
            balance,
            transactions,
        })
    }
}
