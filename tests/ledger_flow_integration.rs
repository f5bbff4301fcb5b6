//! End-to-end flow through the HTTP adapter: record transactions, read
//! history, corrupt the balance, reconcile it back.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use points_backend::api::{create_router, AppState};
use points_backend::events::EventBus;
use points_backend::ledger::LedgerService;
use points_backend::models::BalanceTotals;
use points_backend::store::{LedgerStore, MemoryStore};

struct TestApp {
    router: axum::Router,
    store: Arc<MemoryStore>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(EventBus::new(64));
    let ledger = Arc::new(LedgerService::new(store.clone(), events.clone()));
    let router = create_router(AppState { ledger, events });
    TestApp { router, store }
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn patch_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_record_history_reconcile_flow() {
    let app = test_app();
    app.store.add_period("2026 Spring", 1, true);
    let account = app.store.add_account("maya");

    // Record an approved earn and an approved spend.
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/transactions",
            json!({
                "accountId": account.id,
                "actorId": "teacher-1",
                "pointsChange": 120,
                "transactionType": "add",
                "reason": "science fair",
                "status": "approved",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["balance"]["currentPoints"], 120);

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/transactions",
            json!({
                "accountId": account.id,
                "actorId": "teacher-1",
                "pointsChange": 20,
                "transactionType": "redeem",
                "reason": "gift shop",
                "giftName": "pencil case",
                "giftPoints": 20,
                "status": "approved",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"]["currentPoints"], 100);
    assert_eq!(body["balance"]["totalEarned"], 120);
    assert_eq!(body["balance"]["totalSpent"], 20);

    // History returns the balance and both transactions, newest first.
    let (status, body) = send(
        &app.router,
        Request::builder()
            .uri(format!("/api/history?accountId={}", account.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"]["currentPoints"], 100);
    assert_eq!(body["data"]["transactions"].as_array().unwrap().len(), 2);

    // Simulate a manual edit drifting the balance, then reconcile it back.
    let balance_id = app
        .store
        .balance_snapshot(&account.id)
        .unwrap()
        .id
        .clone();
    app.store
        .update_balance_totals(
            &balance_id,
            &BalanceTotals {
                current_points: 9999,
                total_earned: 9999,
                total_spent: 0,
            },
        )
        .await
        .unwrap();

    let (status, body) = send(
        &app.router,
        Request::builder()
            .method("PUT")
            .uri("/api/reconcile")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["summary"]["updated"], 1);
    assert_eq!(body["summary"]["errors"], 0);

    let restored = app.store.balance_snapshot(&account.id).unwrap();
    assert_eq!(restored.current_points, 100);
    assert_eq!(restored.total_earned, 120);
    assert_eq!(restored.total_spent, 20);
}

#[tokio::test]
async fn test_missing_required_field_returns_400() {
    let app = test_app();
    app.store.add_period("2026 Spring", 1, true);

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/transactions",
            json!({
                "actorId": "teacher-1",
                "pointsChange": 10,
                "transactionType": "add",
                "reason": "homework",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("accountId"));
}

#[tokio::test]
async fn test_unknown_account_returns_404() {
    let app = test_app();
    app.store.add_period("2026 Spring", 1, true);

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/transactions",
            json!({
                "accountId": "ghost",
                "actorId": "teacher-1",
                "pointsChange": 10,
                "transactionType": "add",
                "reason": "homework",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_approval_flow_over_http() {
    let app = test_app();
    app.store.add_period("2026 Spring", 1, true);
    let account = app.store.add_account("omar");

    // Default status is pending.
    let (_, body) = send(
        &app.router,
        post_json(
            "/api/transactions",
            json!({
                "accountId": account.id,
                "actorId": "teacher-1",
                "pointsChange": 10,
                "transactionType": "add",
                "reason": "homework",
            }),
        ),
    )
    .await;
    let txn_id = body["transaction"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["transaction"]["status"], "pending");

    // A pending transaction does not count toward reconciliation.
    let (_, body) = send(
        &app.router,
        Request::builder()
            .method("PUT")
            .uri("/api/reconcile")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body["summary"]["processed"], 0);

    // Approve, then the same transaction is picked up.
    let (status, body) = send(
        &app.router,
        patch_json(
            &format!("/api/transactions/{txn_id}/status"),
            json!({"status": "approved"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "approved");

    let (_, body) = send(
        &app.router,
        Request::builder()
            .method("PUT")
            .uri("/api/reconcile")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body["summary"]["processed"], 1);

    // Double approval conflicts.
    let (status, body) = send(
        &app.router,
        patch_json(
            &format!("/api/transactions/{txn_id}/status"),
            json!({"status": "rejected"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}
