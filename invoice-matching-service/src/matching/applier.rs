//! Insert-then-apply with a compensating delete.

use super::classifier::{match_reason, MatchClassification};
use super::error::MatchError;
use super::proposal::MatchProposal;
use crate::models::{MatchType, NewMatch, ReconciliationMatch};
use crate::services::audit::{actions, entities, AuditRecorder};
use crate::services::metrics::{record_compensation, record_error};
use crate::services::{ApplyMatch, LedgerStore, StoreError};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

/// Manual matches are made by a person who is certain of them.
pub const MANUAL_MATCH_CONFIDENCE: i32 = 100;

/// An allocation that has been sized and labelled but not yet persisted.
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub bank_transaction_id: Uuid,
    pub invoice_id: Uuid,
    pub proposal: MatchProposal,
    pub label: MatchClassification,
    pub notes: Option<String>,
}

impl PendingMatch {
    fn to_new_match(&self) -> NewMatch {
        NewMatch {
            bank_transaction_id: self.bank_transaction_id,
            invoice_id: self.invoice_id,
            matched_amount: self.proposal.proposed,
            match_type: MatchType::Manual,
            match_confidence: MANUAL_MATCH_CONFIDENCE,
            match_reason: match_reason(self.label, self.notes.as_deref()),
            notes: self.notes.clone(),
        }
    }
}

/// Persist the proposal as a `suggested` match and hand it to the atomic
/// apply operation. If apply fails the match row is deleted again so no
/// suggestion is left without a ledger effect.
#[instrument(skip_all, fields(
    bank_transaction_id = %pending.bank_transaction_id,
    invoice_id = %pending.invoice_id,
    amount = %pending.proposal.proposed,
    label = %pending.label,
))]
pub async fn apply_manual_match(
    store: &dyn LedgerStore,
    applier: &dyn ApplyMatch,
    audit: &AuditRecorder,
    pending: &PendingMatch,
    actor_user_id: &str,
) -> Result<ReconciliationMatch, MatchError> {
    let PendingMatch {
        bank_transaction_id,
        invoice_id,
        proposal,
        label,
        ..
    } = pending;
    let new_match = pending.to_new_match();

    let inserted = store
        .insert_suggested_match(&new_match)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(msg) => {
                tracing::warn!(reason = %msg, "Allocation lost to a concurrent match");
                MatchError::Conflict(
                    "Bank transaction funds were allocated by another request; retry the match"
                        .to_string(),
                )
            }
            other => {
                record_error("match_insert");
                tracing::error!(error = %other, "Failed to insert reconciliation match");
                MatchError::InsertFailed(other)
            }
        })?;

    let match_id = inserted.match_id;

    if let Err(apply_err) = applier.apply_match(match_id, actor_user_id).await {
        record_error("match_apply");
        tracing::error!(error = %apply_err, match_id = %match_id, "Apply operation failed, removing suggested match");

        match store.delete_match(match_id).await {
            Ok(()) => {
                record_compensation("deleted");
                audit
                    .record(
                        actor_user_id,
                        actions::MATCH_COMPENSATED,
                        entities::RECONCILIATION_MATCH,
                        match_id,
                        json!({
                            "bank_transaction_id": bank_transaction_id,
                            "invoice_id": invoice_id,
                            "matched_amount": proposal.proposed,
                            "error": apply_err.to_string(),
                        }),
                    )
                    .await;
            }
            Err(delete_err) => {
                record_compensation("failed");
                tracing::error!(
                    error = %delete_err,
                    apply_error = %apply_err,
                    match_id = %match_id,
                    "Compensating delete failed; suggested match left without ledger effect"
                );
            }
        }

        return Err(MatchError::ApplyFailed {
            match_id,
            source: apply_err,
        });
    }

    tracing::info!(match_id = %match_id, "Reconciliation match applied");

    audit
        .record(
            actor_user_id,
            actions::MATCH_APPROVED,
            entities::RECONCILIATION_MATCH,
            match_id,
            json!({
                "bank_transaction_id": bank_transaction_id,
                "invoice_id": invoice_id,
                "matched_amount": proposal.proposed,
                "classification": label.as_str(),
                "invoice_balance": proposal.invoice_balance,
                "remaining_on_transaction": proposal.remaining_on_transaction,
                "previous_status": inserted.status,
                "new_status": "approved",
            }),
        )
        .await;

    Ok(inserted)
}
