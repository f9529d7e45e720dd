//! Failure taxonomy for a manual match request.

use crate::services::StoreError;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MatchError {
    /// Caller input or business precondition; message is shown to the user.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// A concurrent allocation reserved the funds first.
    #[error("{0}")]
    Conflict(String),

    /// Could not load the context needed to compute the allocation.
    #[error("failed to load {what}: {source}")]
    ReadFailed {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    /// Nothing was created.
    #[error("failed to create reconciliation match: {0}")]
    InsertFailed(#[source] StoreError),

    /// The apply operation failed; the suggested match has been (or was
    /// attempted to be) removed.
    #[error("failed to apply reconciliation match {match_id}: {source}")]
    ApplyFailed {
        match_id: Uuid,
        #[source]
        source: StoreError,
    },

    /// Derived bank transaction status could not be written.
    #[error("failed to update bank transaction {bank_transaction_id}: {source}")]
    StateUpdateFailed {
        bank_transaction_id: Uuid,
        #[source]
        source: StoreError,
    },

    /// The invoice settled but its fee events could not be marked paid.
    #[error("match {match_id} applied but fee settlement failed for invoice {invoice_id}: {source}")]
    FeeSettlementFailed {
        match_id: Uuid,
        invoice_id: Uuid,
        #[source]
        source: StoreError,
    },

    /// The ledger mutation already committed; only the post-state read failed.
    #[error("match {match_id} applied but failed to reload {what}: {source}")]
    FollowUpReadFailed {
        match_id: Uuid,
        what: &'static str,
        #[source]
        source: StoreError,
    },

    /// The match is applied but a subscription funding update was lost.
    #[error("match {match_id} applied but funding update failed for subscription {subscription_id}: {source}")]
    CascadeFailed {
        match_id: Uuid,
        subscription_id: Uuid,
        #[source]
        source: StoreError,
    },
}

impl MatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ReadFailed { .. } => "read_failed",
            Self::InsertFailed(_) => "insert_failed",
            Self::ApplyFailed { .. } => "apply_failed",
            Self::StateUpdateFailed { .. } => "state_update_failed",
            Self::FeeSettlementFailed { .. } => "fee_settlement_failed",
            Self::FollowUpReadFailed { .. } => "follow_up_read_failed",
            Self::CascadeFailed { .. } => "cascade_failed",
        }
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            MatchError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            MatchError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            other => AppError::InternalError(anyhow::Error::new(other)),
        }
    }
}
