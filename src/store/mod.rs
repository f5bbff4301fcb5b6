//! Datastore access layer.
//!
//! The ledger treats the datastore as an external collaborator reached over
//! HTTP; `LedgerStore` is the seam. `RestStore` talks to the hosted
//! collection/record API, `MemoryStore` backs tests and local development.

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Account, AccountingPeriod, Balance, BalanceTotals, NewBalance, NewTransaction,
    PointsTransaction, TransactionStatus,
};

/// One page of a collection listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_account(&self, id: &str) -> Result<Option<Account>>;

    async fn get_active_period(&self) -> Result<Option<AccountingPeriod>>;

    async fn get_period(&self, id: &str) -> Result<Option<AccountingPeriod>>;

    async fn create_transaction(&self, new: &NewTransaction) -> Result<PointsTransaction>;

    async fn get_transaction(&self, id: &str) -> Result<Option<PointsTransaction>>;

    /// Hard delete; only legal use is the compensating rollback and the
    /// idempotency sweep.
    async fn delete_transaction(&self, id: &str) -> Result<()>;

    async fn find_transactions_by_client_ref(
        &self,
        client_ref: &str,
    ) -> Result<Vec<PointsTransaction>>;

    async fn update_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
    ) -> Result<PointsTransaction>;

    /// Paged listing, optionally filtered by status, oldest first.
    async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
        page: usize,
        per_page: usize,
    ) -> Result<Page<PointsTransaction>>;

    /// Most recent transactions for one account, newest first.
    async fn recent_transactions_for_account(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>>;

    async fn get_balance_for_account(&self, account_id: &str) -> Result<Option<Balance>>;

    async fn create_balance(&self, new: &NewBalance) -> Result<Balance>;

    /// Overwrites the three numeric fields and refreshes `updated`; never
    /// touches the period boundary fields.
    async fn update_balance_totals(&self, id: &str, totals: &BalanceTotals) -> Result<Balance>;

    async fn list_balances(&self, page: usize, per_page: usize) -> Result<Page<Balance>>;
}
