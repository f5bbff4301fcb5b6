//! Ledger core - balance synchronization against the remote datastore.
//!
//! This module owns:
//! 1. The two-step transaction + balance write with compensation and retry
//! 2. Lazy balance initialization bound to the active accounting period
//! 3. The batch reconciler that rebuilds balances from approved history
//!
//! Architecture:
//! - All datastore access goes through the `LedgerStore` trait
//! - Same-account operations are serialized on a per-account async mutex
//! - Every public operation returns a typed `LedgerError`, never a panic

pub mod balances;
pub mod reconcile;
pub mod writer;

pub use reconcile::{ReconcileAction, ReconcileDetail, ReconcileReport, ReconcileSummary};
pub use writer::{AccountHistory, RecordOutcome, RecordRequest};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::events::EventBus;
use crate::models::{PointsTransaction, TransactionStatus};
use crate::store::LedgerStore;

/// Failure taxonomy of the public ledger operations.
#[derive(Debug)]
pub enum LedgerError {
    /// Referenced account does not exist. Never retried.
    AccountNotFound(String),
    /// Caller-supplied season id does not exist. Never retried.
    SeasonNotFound(String),
    /// No season is marked active and the caller supplied none. A hard
    /// configuration error, not a silent fallback.
    NoActivePeriod,
    TransactionNotFound(String),
    /// Invalid status transition.
    Conflict(String),
    /// Read-path store failure, surfaced as-is.
    Store(anyhow::Error),
    /// The transaction/balance write pair kept failing; carries the last
    /// underlying error.
    WriteExhausted {
        attempts: u32,
        source: anyhow::Error,
    },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::AccountNotFound(id) => write!(f, "account {id} not found"),
            LedgerError::SeasonNotFound(id) => write!(f, "accounting period {id} not found"),
            LedgerError::NoActivePeriod => {
                write!(f, "no active accounting period configured")
            }
            LedgerError::TransactionNotFound(id) => write!(f, "transaction {id} not found"),
            LedgerError::Conflict(msg) => write!(f, "{msg}"),
            LedgerError::Store(e) => write!(f, "store error: {e}"),
            LedgerError::WriteExhausted { attempts, source } => {
                write!(f, "write failed after {attempts} attempts: {source}")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

/// Backoff schedule for the write pair: base delay doubling per attempt,
/// capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based; the first attempt has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(2).min(16);
        let delay = self.base_delay * 2u32.pow(doublings);
        delay.min(self.max_delay)
    }
}

/// The ledger service: store + notifier + retry policy + per-account locks.
pub struct LedgerService {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) retry: RetryPolicy,
    account_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, events: Arc<EventBus>) -> Self {
        Self::with_retry(store, events, RetryPolicy::default())
    }

    pub fn with_retry(
        store: Arc<dyn LedgerStore>,
        events: Arc<EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            events,
            retry,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// One mutex per account id; held across the whole retry loop so the
    /// read-compute-write sequence cannot interleave with itself in-process.
    pub(crate) fn account_lock(&self, account_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.account_locks.lock();
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Pending -> approved/rejected transition. Does not touch the balance:
    /// the incremental balance moved at create time, and the reconciler is
    /// what makes status authoritative.
    pub async fn set_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
    ) -> Result<PointsTransaction, LedgerError> {
        if status == TransactionStatus::Pending {
            return Err(LedgerError::Conflict(
                "transactions cannot be moved back to pending".to_string(),
            ));
        }

        let txn = self
            .store
            .get_transaction(id)
            .await
            .map_err(LedgerError::Store)?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;

        if txn.status != TransactionStatus::Pending {
            return Err(LedgerError::Conflict(format!(
                "transaction {id} is already {}",
                txn.status.as_str()
            )));
        }

        self.store
            .update_transaction_status(id, status)
            .await
            .map_err(LedgerError::Store)
    }
}
