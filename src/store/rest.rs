//! REST client for the hosted datastore.
//!
//! Speaks the collection/record API (`/api/collections/{name}/records`) the
//! school backend exposes. Writes are plain CRUD; filtering and paging are
//! expressed as query parameters.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LedgerStore, Page};
use crate::models::{
    Account, AccountingPeriod, Balance, BalanceTotals, NewBalance, NewTransaction,
    PointsTransaction, TransactionStatus,
};

const TRANSACTIONS: &str = "transactions";
const BALANCES: &str = "balances";
const PERIODS: &str = "accounting_periods";
const ACCOUNTS: &str = "accounts";

#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    page: usize,
    per_page: usize,
    total_items: usize,
    total_pages: usize,
    items: Vec<T>,
}

impl<T> From<ListResponse<T>> for Page<T> {
    fn from(list: ListResponse<T>) -> Self {
        Page {
            items: list.items,
            page: list.page,
            per_page: list.per_page,
            total_items: list.total_items,
            total_pages: list.total_pages,
        }
    }
}

impl RestStore {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                if let Some(token) = token {
                    headers.insert(
                        reqwest::header::AUTHORIZATION,
                        token.parse().context("Invalid store token")?,
                    );
                }
                headers
            })
            .build()
            .context("Failed to build RestStore client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{}/records", self.base_url, collection)
    }

    #[inline]
    fn record_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/api/collections/{}/records/{}",
            self.base_url, collection, id
        )
    }

    async fn get_record<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>> {
        let resp = self
            .client
            .get(self.record_url(collection, id))
            .send()
            .await
            .with_context(|| format!("GET {collection}/{id} failed"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET {collection}/{id} {status}: {text}"));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse {collection} record"))
            .map(Some)
    }

    async fn list_records<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Option<&str>,
        sort: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Result<Page<T>> {
        let mut qp: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("perPage", per_page.to_string()),
        ];
        if let Some(filter) = filter {
            qp.push(("filter", filter.to_string()));
        }
        if let Some(sort) = sort {
            qp.push(("sort", sort.to_string()));
        }

        let resp = self
            .client
            .get(self.records_url(collection))
            .query(&qp)
            .send()
            .await
            .with_context(|| format!("GET {collection} list failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET {collection} list {status}: {text}"));
        }

        resp.json::<ListResponse<T>>()
            .await
            .with_context(|| format!("Failed to parse {collection} list response"))
            .map(Page::from)
    }

    async fn create_record<B: Serialize, T: DeserializeOwned>(
        &self,
        collection: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .post(self.records_url(collection))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {collection} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("POST {collection} {status}: {text}"));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse created {collection} record"))
    }

    async fn patch_record<B: Serialize, T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .patch(self.record_url(collection, id))
            .json(body)
            .send()
            .await
            .with_context(|| format!("PATCH {collection}/{id} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("PATCH {collection}/{id} {status}: {text}"));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse updated {collection} record"))
    }
}

#[async_trait]
impl LedgerStore for RestStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        self.get_record(ACCOUNTS, id).await
    }

    async fn get_active_period(&self) -> Result<Option<AccountingPeriod>> {
        let page: Page<AccountingPeriod> = self
            .list_records(PERIODS, Some("isActive=true"), None, 1, 1)
            .await?;
        Ok(page.items.into_iter().next())
    }

    async fn get_period(&self, id: &str) -> Result<Option<AccountingPeriod>> {
        self.get_record(PERIODS, id).await
    }

    async fn create_transaction(&self, new: &NewTransaction) -> Result<PointsTransaction> {
        self.create_record(TRANSACTIONS, new).await
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<PointsTransaction>> {
        self.get_record(TRANSACTIONS, id).await
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.record_url(TRANSACTIONS, id))
            .send()
            .await
            .with_context(|| format!("DELETE transactions/{id} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("DELETE transactions/{id} {status}: {text}"));
        }
        Ok(())
    }

    async fn find_transactions_by_client_ref(
        &self,
        client_ref: &str,
    ) -> Result<Vec<PointsTransaction>> {
        let filter = format!("clientRef='{client_ref}'");
        let page: Page<PointsTransaction> = self
            .list_records(TRANSACTIONS, Some(&filter), None, 1, 50)
            .await?;
        Ok(page.items)
    }

    async fn update_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
    ) -> Result<PointsTransaction> {
        self.patch_record(
            TRANSACTIONS,
            id,
            &serde_json::json!({ "status": status.as_str() }),
        )
        .await
    }

    async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
        page: usize,
        per_page: usize,
    ) -> Result<Page<PointsTransaction>> {
        let filter = status.map(|s| format!("status='{}'", s.as_str()));
        self.list_records(
            TRANSACTIONS,
            filter.as_deref(),
            Some("created"),
            page,
            per_page,
        )
        .await
    }

    async fn recent_transactions_for_account(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>> {
        let filter = format!("accountId='{account_id}'");
        let page: Page<PointsTransaction> = self
            .list_records(TRANSACTIONS, Some(&filter), Some("-created"), 1, limit)
            .await?;
        Ok(page.items)
    }

    async fn get_balance_for_account(&self, account_id: &str) -> Result<Option<Balance>> {
        let filter = format!("accountId='{account_id}'");
        let page: Page<Balance> = self
            .list_records(BALANCES, Some(&filter), Some("-updated"), 1, 1)
            .await?;
        Ok(page.items.into_iter().next())
    }

    async fn create_balance(&self, new: &NewBalance) -> Result<Balance> {
        self.create_record(BALANCES, new).await
    }

    async fn update_balance_totals(&self, id: &str, totals: &BalanceTotals) -> Result<Balance> {
        self.patch_record(BALANCES, id, totals).await
    }

    async fn list_balances(&self, page: usize, per_page: usize) -> Result<Page<Balance>> {
        self.list_records(BALANCES, None, Some("created"), page, per_page)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rest_store_creation() {
        let store = RestStore::new("http://127.0.0.1:8090/".to_string(), None);
        assert!(store.is_ok());
        assert_eq!(
            store.unwrap().records_url("transactions"),
            "http://127.0.0.1:8090/api/collections/transactions/records"
        );
    }

    #[tokio::test]
    async fn test_rest_store_rejects_bad_token() {
        let store = RestStore::new(
            "http://127.0.0.1:8090".to_string(),
            Some("bad\ntoken".to_string()),
        );
        assert!(store.is_err());
    }
}
