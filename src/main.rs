//! pointsd - Balance Ledger Synchronizer
//!
//! Keeps derived per-account point balances consistent with the append-only
//! transaction log in the hosted datastore, and exposes the ledger over HTTP
//! for the school dashboards.

use anyhow::{Context, Result};
use axum::middleware;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use points_backend::api::{self, AppState};
use points_backend::events::{self, EventBus};
use points_backend::ledger::LedgerService;
use points_backend::middleware::request_logging;
use points_backend::models::Config;
use points_backend::store::{LedgerStore, MemoryStore, RestStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    info!("🚀 Points ledger synchronizer starting on port {}", config.port);

    let store: Arc<dyn LedgerStore> = match &config.store_base_url {
        Some(base_url) => {
            info!("📦 Datastore: {}", base_url);
            Arc::new(RestStore::new(base_url.clone(), config.store_token.clone())?)
        }
        None => {
            warn!("STORE_BASE_URL not set - using in-memory store (state is not durable)");
            Arc::new(MemoryStore::new())
        }
    };

    let event_bus = Arc::new(EventBus::new(1000));

    // Audit trail for balance movements; kept out of the write path's
    // failure handling by the bus's per-listener boundary.
    event_bus.on(events::BALANCE_UPDATED, |payload| {
        info!(
            account_id = payload["accountId"].as_str().unwrap_or("?"),
            transaction_id = payload["transactionId"].as_str().unwrap_or("?"),
            "Balance updated"
        );
        Ok(())
    });
    event_bus.on(events::RECONCILIATION_COMPLETED, |payload| {
        info!(
            processed = payload["processed"].as_u64().unwrap_or(0),
            errors = payload["errors"].as_u64().unwrap_or(0),
            "Reconciliation completed"
        );
        Ok(())
    });

    let ledger = Arc::new(LedgerService::new(store, event_bus.clone()));

    let app = api::create_router(AppState {
        ledger,
        events: event_bus,
    })
    .layer(middleware::from_fn(request_logging))
    .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("📡 Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("Server crashed")?;
    Ok(())
}

/// Initialize tracing with env-filter overrides
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "points_backend=debug,pointsd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
