//! Application startup and lifecycle management.

use crate::config::MatchingServiceConfig;
use crate::handlers::{self, health_check, metrics_handler, readiness_check};
use crate::matching::MatchingEngine;
use crate::services::{init_metrics, LedgerStore, PgLedgerStore};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: MatchingEngine,
    pub store: Arc<dyn LedgerStore>,
}

impl AppState {
    pub fn new(engine: MatchingEngine) -> Self {
        let store = engine.store().clone();
        Self { engine, store }
    }
}

/// HTTP routes with the shared middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/reconciliation/matches",
            post(handlers::matches::create_match),
        )
        .route(
            "/api/reconciliation/bank-transactions/:id/matches",
            get(handlers::matches::list_transaction_matches),
        )
        .route(
            "/api/reconciliation/bank-transactions/:id/recompute",
            post(handlers::matches::recompute_transaction),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration, running migrations first.
    pub async fn build(config: MatchingServiceConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = PgLedgerStore::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        store.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        // One pool serves reads, the apply transaction and the audit log.
        let store = Arc::new(store);
        let engine = MatchingEngine::new(store.clone(), store.clone(), store);
        let router = build_router(AppState::new(engine));

        let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e))
            })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "Invoice matching service listener bound");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "invoice-matching-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, self.router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
