use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::events::EventBus;
use crate::ledger::{
    AccountHistory, LedgerError, LedgerService, RecordRequest, ReconcileDetail, ReconcileSummary,
};
use crate::models::{Balance, PointsTransaction, TransactionStatus, TransactionType};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub events: Arc<EventBus>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/transactions", post(create_transaction))
        .route(
            "/api/transactions/:id/status",
            patch(set_transaction_status),
        )
        .route("/api/reconcile", put(trigger_reconciliation))
        .route("/api/history", get(account_history))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> &'static str {
    "Points ledger synchronizer operational"
}

/// Record one transaction and synchronize the account balance
async fn create_transaction(
    State(state): State<AppState>,
    Json(body): Json<CreateTransactionRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let req = body.into_record_request()?;
    let outcome = state.ledger.record_transaction(req).await?;

    Ok(Json(TransactionResponse {
        success: true,
        transaction: outcome.transaction,
        balance: outcome.balance,
    }))
}

/// Pending -> approved/rejected transition
async fn set_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let raw = body
        .status
        .ok_or_else(|| ApiError::BadRequest("status is required".to_string()))?;
    let status = TransactionStatus::parse(&raw)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status '{raw}'")))?;

    let transaction = state.ledger.set_transaction_status(&id, status).await?;
    Ok(Json(StatusResponse {
        success: true,
        transaction,
    }))
}

/// Rebuild all balances from approved transaction history
async fn trigger_reconciliation(
    State(state): State<AppState>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let report = state.ledger.reconcile().await?;
    Ok(Json(ReconcileResponse {
        success: true,
        summary: report.summary,
        details: report.details,
    }))
}

/// Balance plus recent transactions for one account
async fn account_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let account_id = params
        .account_id
        .ok_or_else(|| ApiError::BadRequest("accountId is required".to_string()))?;
    let limit = params.limit.unwrap_or(50).min(500);

    let data = state.ledger.account_history(&account_id, limit).await?;
    Ok(Json(HistoryResponse {
        success: true,
        data,
    }))
}

/// WebSocket endpoint streaming notifier events to the dashboards
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.events.subscribe();

    loop {
        tokio::select! {
            // Push notifier events to the client
            Ok(event) = rx.recv() => {
                let msg = serde_json::to_string(&event).unwrap_or_else(|e| {
                    warn!("Failed to serialize ws event: {}", e);
                    "{}".to_string()
                });
                if socket.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            // Handle incoming messages from client
            Some(Ok(msg)) = socket.recv() => {
                match msg {
                    Message::Text(text) if text == "ping" => {
                        let _ = socket.send(Message::Text("pong".to_string())).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionRequest {
    account_id: Option<String>,
    actor_id: Option<String>,
    points_change: Option<i64>,
    transaction_type: Option<String>,
    reason: Option<String>,
    gift_name: Option<String>,
    gift_points: Option<i64>,
    season_id: Option<String>,
    status: Option<String>,
}

impl CreateTransactionRequest {
    /// Manual required-field validation so missing fields map to 400 with a
    /// named field, matching what the dashboards expect.
    fn into_record_request(self) -> Result<RecordRequest, ApiError> {
        let account_id = require(self.account_id, "accountId")?;
        let actor_id = require(self.actor_id, "actorId")?;
        let points_change = self
            .points_change
            .ok_or_else(|| ApiError::BadRequest("pointsChange is required".to_string()))?;
        let raw_type = require(self.transaction_type, "transactionType")?;
        let transaction_type = TransactionType::parse(&raw_type).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown transactionType '{raw_type}'"))
        })?;
        let reason = require(self.reason, "reason")?;
        let status = match self.status {
            None => None,
            Some(raw) => Some(
                TransactionStatus::parse(&raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown status '{raw}'")))?,
            ),
        };

        Ok(RecordRequest {
            account_id,
            actor_id,
            points_change,
            transaction_type,
            reason,
            gift_name: self.gift_name,
            gift_points: self.gift_points,
            season_id: self.season_id,
            status,
        })
    }
}

fn require(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!("{field} is required"))),
    }
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    account_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TransactionResponse {
    success: bool,
    transaction: PointsTransaction,
    balance: Balance,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    transaction: PointsTransaction,
}

#[derive(Serialize)]
struct ReconcileResponse {
    success: bool,
    summary: ReconcileSummary,
    details: Vec<ReconcileDetail>,
}

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    data: AccountHistory,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(_)
            | LedgerError::SeasonNotFound(_)
            | LedgerError::TransactionNotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::Conflict(_) => ApiError::Conflict(err.to_string()),
            LedgerError::NoActivePeriod
            | LedgerError::Store(_)
            | LedgerError::WriteExhausted { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Ledger operation failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
