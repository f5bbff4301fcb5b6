//! In-memory `LedgerStore`.
//!
//! Backs local development (no datastore configured) and the test suites.
//! Failure injection is armed explicitly per test: counters burn down one
//! failure per matching call, account-scoped arming fails every balance
//! write for that account.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{LedgerStore, Page};
use crate::models::{
    Account, AccountingPeriod, Balance, BalanceTotals, NewBalance, NewTransaction,
    PointsTransaction, TransactionStatus, TransactionType,
};

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, Account>,
    periods: Vec<AccountingPeriod>,
    transactions: Vec<PointsTransaction>,
    balances: Vec<Balance>,

    // Failure injection
    fail_transaction_creates: usize,
    fail_transaction_deletes: usize,
    fail_transaction_lists: usize,
    fail_balance_writes: usize,
    failing_balance_accounts: HashSet<String>,

    // Call counters for assertions
    transaction_create_calls: usize,
    balance_write_calls: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    // ----- seeding -----

    pub fn add_account(&self, name: &str) -> Account {
        let account = Account {
            id: Self::next_id(),
            name: name.to_string(),
        };
        self.inner
            .lock()
            .accounts
            .insert(account.id.clone(), account.clone());
        account
    }

    pub fn add_period(&self, name: &str, number: i64, is_active: bool) -> AccountingPeriod {
        let now = Utc::now();
        let period = AccountingPeriod {
            id: Self::next_id(),
            name: name.to_string(),
            number,
            starts_at: now,
            ends_at: now + chrono::Duration::days(90),
            is_active,
        };
        self.inner.lock().periods.push(period.clone());
        period
    }

    /// Appends a transaction directly, bypassing the writer. Test seeding
    /// only.
    pub fn seed_transaction(
        &self,
        account_id: &str,
        transaction_type: TransactionType,
        points: i64,
        status: TransactionStatus,
        season_id: &str,
    ) -> PointsTransaction {
        let now = Utc::now();
        let txn = PointsTransaction {
            id: Self::next_id(),
            account_id: account_id.to_string(),
            actor_id: "seed".to_string(),
            points,
            transaction_type,
            status,
            reason: "seeded".to_string(),
            gift_name: None,
            gift_points: None,
            season_id: season_id.to_string(),
            client_ref: Self::next_id(),
            created: now,
            updated: now,
        };
        self.inner.lock().transactions.push(txn.clone());
        txn
    }

    pub fn seed_balance(
        &self,
        account_id: &str,
        totals: BalanceTotals,
        period: &AccountingPeriod,
    ) -> Balance {
        let balance = Balance {
            id: Self::next_id(),
            account_id: account_id.to_string(),
            current_points: totals.current_points,
            total_earned: totals.total_earned,
            total_spent: totals.total_spent,
            season_id: period.id.clone(),
            season_number: period.number,
            starts_at: period.starts_at,
            ends_at: period.ends_at,
            updated: Utc::now(),
        };
        self.inner.lock().balances.push(balance.clone());
        balance
    }

    // ----- failure arming -----

    pub fn fail_next_transaction_creates(&self, n: usize) {
        self.inner.lock().fail_transaction_creates = n;
    }

    pub fn fail_next_transaction_deletes(&self, n: usize) {
        self.inner.lock().fail_transaction_deletes = n;
    }

    pub fn fail_next_transaction_lists(&self, n: usize) {
        self.inner.lock().fail_transaction_lists = n;
    }

    /// Fails the next `n` balance creates/updates, whichever comes first.
    pub fn fail_next_balance_writes(&self, n: usize) {
        self.inner.lock().fail_balance_writes = n;
    }

    /// Fails every balance write for one account until disarmed.
    pub fn fail_balance_writes_for(&self, account_id: &str) {
        self.inner
            .lock()
            .failing_balance_accounts
            .insert(account_id.to_string());
    }

    // ----- introspection -----

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    pub fn transaction_create_calls(&self) -> usize {
        self.inner.lock().transaction_create_calls
    }

    pub fn balance_write_calls(&self) -> usize {
        self.inner.lock().balance_write_calls
    }

    pub fn balance_rows_for(&self, account_id: &str) -> usize {
        self.inner
            .lock()
            .balances
            .iter()
            .filter(|b| b.account_id == account_id)
            .count()
    }

    pub fn balance_snapshot(&self, account_id: &str) -> Option<Balance> {
        self.inner
            .lock()
            .balances
            .iter()
            .find(|b| b.account_id == account_id)
            .cloned()
    }
}

fn slice_page<T: Clone>(all: &[T], page: usize, per_page: usize) -> Page<T> {
    let total_items = all.len();
    let per_page = per_page.max(1);
    let total_pages = total_items.div_ceil(per_page);
    let start = page.saturating_sub(1) * per_page;
    let items = all
        .iter()
        .skip(start)
        .take(per_page)
        .cloned()
        .collect::<Vec<_>>();
    Page {
        items,
        page,
        per_page,
        total_items,
        total_pages,
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.inner.lock().accounts.get(id).cloned())
    }

    async fn get_active_period(&self) -> Result<Option<AccountingPeriod>> {
        Ok(self
            .inner
            .lock()
            .periods
            .iter()
            .find(|p| p.is_active)
            .cloned())
    }

    async fn get_period(&self, id: &str) -> Result<Option<AccountingPeriod>> {
        Ok(self
            .inner
            .lock()
            .periods
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn create_transaction(&self, new: &NewTransaction) -> Result<PointsTransaction> {
        let mut inner = self.inner.lock();
        inner.transaction_create_calls += 1;
        if inner.fail_transaction_creates > 0 {
            inner.fail_transaction_creates -= 1;
            return Err(anyhow!("injected transaction create failure"));
        }
        let now = Utc::now();
        let txn = PointsTransaction {
            id: Self::next_id(),
            account_id: new.account_id.clone(),
            actor_id: new.actor_id.clone(),
            points: new.points,
            transaction_type: new.transaction_type,
            status: new.status,
            reason: new.reason.clone(),
            gift_name: new.gift_name.clone(),
            gift_points: new.gift_points,
            season_id: new.season_id.clone(),
            client_ref: new.client_ref.clone(),
            created: now,
            updated: now,
        };
        inner.transactions.push(txn.clone());
        Ok(txn)
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<PointsTransaction>> {
        Ok(self
            .inner
            .lock()
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_transaction_deletes > 0 {
            inner.fail_transaction_deletes -= 1;
            return Err(anyhow!("injected transaction delete failure"));
        }
        let before = inner.transactions.len();
        inner.transactions.retain(|t| t.id != id);
        if inner.transactions.len() == before {
            return Err(anyhow!("transaction {id} not found"));
        }
        Ok(())
    }

    async fn find_transactions_by_client_ref(
        &self,
        client_ref: &str,
    ) -> Result<Vec<PointsTransaction>> {
        Ok(self
            .inner
            .lock()
            .transactions
            .iter()
            .filter(|t| t.client_ref == client_ref)
            .cloned()
            .collect())
    }

    async fn update_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
    ) -> Result<PointsTransaction> {
        let mut inner = self.inner.lock();
        let txn = inner
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("transaction {id} not found"))?;
        txn.status = status;
        txn.updated = Utc::now();
        Ok(txn.clone())
    }

    async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
        page: usize,
        per_page: usize,
    ) -> Result<Page<PointsTransaction>> {
        let mut inner = self.inner.lock();
        if inner.fail_transaction_lists > 0 {
            inner.fail_transaction_lists -= 1;
            return Err(anyhow!("injected transaction list failure"));
        }
        let filtered: Vec<PointsTransaction> = inner
            .transactions
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        Ok(slice_page(&filtered, page, per_page))
    }

    async fn recent_transactions_for_account(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>> {
        let mut txns: Vec<PointsTransaction> = self
            .inner
            .lock()
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        txns.sort_by(|a, b| b.created.cmp(&a.created));
        txns.truncate(limit);
        Ok(txns)
    }

    async fn get_balance_for_account(&self, account_id: &str) -> Result<Option<Balance>> {
        Ok(self
            .inner
            .lock()
            .balances
            .iter()
            .find(|b| b.account_id == account_id)
            .cloned())
    }

    async fn create_balance(&self, new: &NewBalance) -> Result<Balance> {
        let mut inner = self.inner.lock();
        inner.balance_write_calls += 1;
        if inner.fail_balance_writes > 0 {
            inner.fail_balance_writes -= 1;
            return Err(anyhow!("injected balance create failure"));
        }
        if inner.failing_balance_accounts.contains(&new.account_id) {
            return Err(anyhow!(
                "injected balance failure for account {}",
                new.account_id
            ));
        }
        let balance = Balance {
            id: Self::next_id(),
            account_id: new.account_id.clone(),
            current_points: new.current_points,
            total_earned: new.total_earned,
            total_spent: new.total_spent,
            season_id: new.season_id.clone(),
            season_number: new.season_number,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            updated: Utc::now(),
        };
        inner.balances.push(balance.clone());
        Ok(balance)
    }

    async fn update_balance_totals(&self, id: &str, totals: &BalanceTotals) -> Result<Balance> {
        let mut inner = self.inner.lock();
        inner.balance_write_calls += 1;
        if inner.fail_balance_writes > 0 {
            inner.fail_balance_writes -= 1;
            return Err(anyhow!("injected balance update failure"));
        }
        let failing = inner.failing_balance_accounts.clone();
        let balance = inner
            .balances
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| anyhow!("balance {id} not found"))?;
        if failing.contains(&balance.account_id) {
            return Err(anyhow!(
                "injected balance failure for account {}",
                balance.account_id
            ));
        }
        balance.current_points = totals.current_points;
        balance.total_earned = totals.total_earned;
        balance.total_spent = totals.total_spent;
        balance.updated = Utc::now();
        Ok(balance.clone())
    }

    async fn list_balances(&self, page: usize, per_page: usize) -> Result<Page<Balance>> {
        let inner = self.inner.lock();
        Ok(slice_page(&inner.balances, page, per_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paging_walks_all_items() {
        let store = MemoryStore::new();
        let period = store.add_period("2026 Spring", 1, true);
        let account = store.add_account("paging");
        for _ in 0..7 {
            store.seed_transaction(
                &account.id,
                TransactionType::Add,
                10,
                TransactionStatus::Approved,
                &period.id,
            );
        }

        let first = store
            .list_transactions(Some(TransactionStatus::Approved), 1, 3)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.total_items, 7);
        assert_eq!(first.total_pages, 3);

        let last = store
            .list_transactions(Some(TransactionStatus::Approved), 3, 3)
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
    }

    #[tokio::test]
    async fn test_status_filter_excludes_pending() {
        let store = MemoryStore::new();
        let period = store.add_period("2026 Spring", 1, true);
        let account = store.add_account("filter");
        store.seed_transaction(
            &account.id,
            TransactionType::Add,
            10,
            TransactionStatus::Pending,
            &period.id,
        );
        store.seed_transaction(
            &account.id,
            TransactionType::Add,
            20,
            TransactionStatus::Approved,
            &period.id,
        );

        let approved = store
            .list_transactions(Some(TransactionStatus::Approved), 1, 100)
            .await
            .unwrap();
        assert_eq!(approved.items.len(), 1);
        assert_eq!(approved.items[0].points, 20);
    }

    #[tokio::test]
    async fn test_injected_balance_failure_burns_down() {
        let store = MemoryStore::new();
        let period = store.add_period("2026 Spring", 1, true);
        let account = store.add_account("arming");
        let balance = store.seed_balance(&account.id, BalanceTotals::zero(), &period);

        store.fail_next_balance_writes(1);
        let totals = BalanceTotals {
            current_points: 5,
            total_earned: 5,
            total_spent: 0,
        };
        assert!(store
            .update_balance_totals(&balance.id, &totals)
            .await
            .is_err());
        assert!(store
            .update_balance_totals(&balance.id, &totals)
            .await
            .is_ok());
    }
}
