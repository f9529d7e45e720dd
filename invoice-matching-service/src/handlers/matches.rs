//! Reconciliation match handlers.
//!
//! The acting user comes from `X-User-ID`; every mutation is attributed to it.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{CreateMatchRequest, CreateMatchResponse, RecomputeResponse, TransactionMatchesResponse},
    matching::ManualMatchRequest,
    middleware::ActorContext,
    startup::AppState,
};

fn bad_request(message: impl std::fmt::Display) -> AppError {
    AppError::BadRequest(anyhow::anyhow!("{}", message))
}

fn parse_path_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request("Bank transaction id must be a valid UUID"))
}

/// Manually allocate a bank transaction to an invoice.
pub async fn create_match(
    State(state): State<AppState>,
    actor: ActorContext,
    payload: Result<Json<CreateMatchRequest>, JsonRejection>,
) -> Result<Json<CreateMatchResponse>, AppError> {
    let Json(payload) = payload.map_err(|rejection| {
        bad_request(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let request = ManualMatchRequest {
        bank_transaction_id: payload.bank_transaction_id().map_err(bad_request)?,
        invoice_id: payload.invoice_id().map_err(bad_request)?,
        requested_amount: payload.requested_amount(),
        notes: payload.notes(),
    };

    tracing::info!(
        bank_transaction_id = %request.bank_transaction_id,
        invoice_id = %request.invoice_id,
        requested_amount = ?request.requested_amount,
        actor = %actor.user_id,
        "Manual match requested"
    );

    // Runs detached so a dropped connection cannot interrupt the
    // insert/apply/compensate sequence halfway.
    let engine = state.engine.clone();
    let outcome = tokio::spawn(async move {
        engine
            .create_manual_match(request, &actor.user_id)
            .await
    })
    .await
    .map_err(|e| AppError::InternalError(anyhow::anyhow!("Match task failed: {}", e)))??;

    Ok(Json(CreateMatchResponse::from(outcome)))
}

/// Approved allocations on a bank transaction.
pub async fn list_transaction_matches(
    State(state): State<AppState>,
    _actor: ActorContext,
    Path(bank_transaction_id): Path<String>,
) -> Result<Json<TransactionMatchesResponse>, AppError> {
    let bank_transaction_id = parse_path_id(&bank_transaction_id)?;

    let view = state
        .engine
        .transaction_matches(bank_transaction_id)
        .await?;

    Ok(Json(TransactionMatchesResponse::from(view)))
}

/// Re-derive a bank transaction's settlement state from its approved matches.
pub async fn recompute_transaction(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(bank_transaction_id): Path<String>,
) -> Result<Json<RecomputeResponse>, AppError> {
    let bank_transaction_id = parse_path_id(&bank_transaction_id)?;

    tracing::info!(
        bank_transaction_id = %bank_transaction_id,
        actor = %actor.user_id,
        "Settlement recompute requested"
    );

    let derived = state
        .engine
        .recompute(bank_transaction_id, &actor.user_id)
        .await?;

    Ok(Json(RecomputeResponse::from(derived)))
}
