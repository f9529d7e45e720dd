use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::error::AppError;

/// Liveness probe. Does not touch the store.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "invoice-matching-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness probe: the ledger store must answer.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Readiness check failed - ledger store unavailable");
        AppError::ServiceUnavailable
    })?;

    tracing::debug!("Readiness check passed");
    Ok((StatusCode::OK, Json(json!({ "status": "ready" }))))
}

/// Metrics endpoint for Prometheus scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
