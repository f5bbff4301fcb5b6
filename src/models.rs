use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a points transaction. The stored magnitude is always
/// non-negative; direction comes from this enum alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Add,
    Deduct,
    Redeem,
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionType::Add => "add",
            TransactionType::Deduct => "deduct",
            TransactionType::Redeem => "redeem",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(TransactionType::Add),
            "deduct" => Some(TransactionType::Deduct),
            "redeem" => Some(TransactionType::Redeem),
            _ => None,
        }
    }

    /// Whether this type grows the balance. Everything that is not an Add
    /// spends points.
    pub fn is_earning(&self) -> bool {
        matches!(self, TransactionType::Add)
    }
}

/// Approval state of a transaction. Only approved transactions count toward
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "approved" => Some(TransactionStatus::Approved),
            "rejected" => Some(TransactionStatus::Rejected),
            _ => None,
        }
    }
}

/// An account whose point balance is tracked (a student, in the school
/// deployment). Only existence matters to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
}

/// A bounded accounting window ("season") that scopes balances. At most one
/// period should be active at a time; the store owns that flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingPeriod {
    pub id: String,
    pub name: String,
    pub number: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
}

/// One immutable point-changing event. `points` is the magnitude; direction
/// is carried by `transaction_type`. The only mutation paths are the
/// compensating delete after a failed paired balance write and the explicit
/// pending -> approved/rejected status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsTransaction {
    pub id: String,
    pub account_id: String,
    pub actor_id: String,
    pub points: i64,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gift_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gift_points: Option<i64>,
    pub season_id: String,
    /// Idempotency key, stable across retries of one logical operation.
    pub client_ref: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Fields the caller supplies when appending a transaction; the store assigns
/// id and timestamps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub account_id: String,
    pub actor_id: String,
    pub points: i64,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_points: Option<i64>,
    pub season_id: String,
    pub client_ref: String,
}

/// The mutable, derived aggregate of an account's points for one period.
/// Target invariant: `current_points == total_earned - total_spent`, both
/// equal to the per-sign sums over approved transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub id: String,
    pub account_id: String,
    pub current_points: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub season_id: String,
    pub season_number: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBalance {
    pub account_id: String,
    pub current_points: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub season_id: String,
    pub season_number: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// The three numeric fields a balance overwrite touches. Period boundaries
/// are never part of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BalanceTotals {
    pub current_points: i64,
    pub total_earned: i64,
    pub total_spent: i64,
}

impl BalanceTotals {
    pub fn zero() -> Self {
        Self {
            current_points: 0,
            total_earned: 0,
            total_spent: 0,
        }
    }
}

impl From<&Balance> for BalanceTotals {
    fn from(balance: &Balance) -> Self {
        Self {
            current_points: balance.current_points,
            total_earned: balance.total_earned,
            total_spent: balance.total_spent,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_base_url: Option<String>,
    pub store_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let store_base_url = std::env::var("STORE_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let store_token = std::env::var("STORE_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            port,
            store_base_url,
            store_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_roundtrip() {
        for tt in [
            TransactionType::Add,
            TransactionType::Deduct,
            TransactionType::Redeem,
        ] {
            assert_eq!(TransactionType::parse(tt.as_str()), Some(tt));
        }
        assert_eq!(TransactionType::parse("subtract"), None);
    }

    #[test]
    fn test_only_add_earns() {
        assert!(TransactionType::Add.is_earning());
        assert!(!TransactionType::Deduct.is_earning());
        assert!(!TransactionType::Redeem.is_earning());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            TransactionStatus::parse("approved"),
            Some(TransactionStatus::Approved)
        );
        assert_eq!(TransactionStatus::parse("done"), None);
    }
}
