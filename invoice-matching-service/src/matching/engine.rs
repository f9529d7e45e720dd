//! Manual match orchestration: size, label, apply, recompute, cascade, and
//! re-read the post-state.

use super::amount::round2;
use super::applier::{apply_manual_match, PendingMatch};
use super::cascade::{run_funding_cascade, CascadeOutcome};
use super::classifier::{classify, MatchClassification};
use super::error::MatchError;
use super::proposal::build_proposal;
use super::reconciler::{purge_stale_suggestions, recompute_transaction_state, TransactionState};
use super::settlement::{balance_is_consistent, derive_invoice_settlement, may_be_marked_paid};
use crate::models::{BankTransaction, Invoice, MatchDetail, ReconciliationMatch};
use crate::services::audit::AuditRecorder;
use crate::services::metrics::{record_error, record_match_classification, record_match_request};
use crate::services::{ApplyMatch, AuditSink, LedgerStore, StoreError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ManualMatchRequest {
    pub bank_transaction_id: Uuid,
    pub invoice_id: Uuid,
    /// Optional cap on the allocation; non-positive values are ignored.
    pub requested_amount: Option<Decimal>,
    pub notes: Option<String>,
}

/// Freshly re-read state after a successful manual match.
#[derive(Debug, Clone)]
pub struct ManualMatchOutcome {
    pub match_id: Uuid,
    pub applied_amount: Decimal,
    pub classification: MatchClassification,
    pub bank_transaction: BankTransaction,
    pub invoice: Invoice,
    pub matches: Vec<MatchDetail>,
    pub total_matched_amount: Decimal,
    pub transaction_state: TransactionState,
    pub funding: Option<CascadeOutcome>,
}

/// Approved allocations on one bank transaction.
#[derive(Debug, Clone)]
pub struct TransactionMatches {
    pub bank_transaction: BankTransaction,
    pub matches: Vec<MatchDetail>,
    pub total_matched_amount: Decimal,
}

#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn LedgerStore>,
    applier: Arc<dyn ApplyMatch>,
    audit: AuditRecorder,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        applier: Arc<dyn ApplyMatch>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            applier,
            audit: AuditRecorder::new(audit_sink),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Allocate a bank transaction to an invoice on behalf of `actor_user_id`.
    #[instrument(skip(self, request), fields(
        bank_transaction_id = %request.bank_transaction_id,
        invoice_id = %request.invoice_id,
        actor = %actor_user_id,
    ))]
    pub async fn create_manual_match(
        &self,
        request: ManualMatchRequest,
        actor_user_id: &str,
    ) -> Result<ManualMatchOutcome, MatchError> {
        let result = self.run_manual_match(request, actor_user_id).await;
        match &result {
            Ok(outcome) => {
                record_match_request("applied");
                record_match_classification(outcome.classification.as_str());
            }
            Err(e) => {
                record_match_request(e.kind());
                if !matches!(
                    e,
                    MatchError::Validation(_) | MatchError::NotFound(_) | MatchError::Conflict(_)
                ) {
                    record_error(e.kind());
                }
            }
        }
        result
    }

    async fn run_manual_match(
        &self,
        request: ManualMatchRequest,
        actor_user_id: &str,
    ) -> Result<ManualMatchOutcome, MatchError> {
        let ManualMatchRequest {
            bank_transaction_id,
            invoice_id,
            requested_amount,
            notes,
        } = request;
        let store = self.store.as_ref();

        // Independent reads, issued together.
        let (transaction, invoice, approved) = tokio::join!(
            store.get_bank_transaction(bank_transaction_id),
            store.get_invoice(invoice_id),
            store.list_approved_matches(bank_transaction_id),
        );

        let transaction = transaction
            .map_err(|source| read_failed("bank transaction", source))?
            .ok_or_else(|| MatchError::NotFound("Bank transaction not found".to_string()))?;
        let invoice = invoice
            .map_err(|source| read_failed("invoice", source))?
            .ok_or_else(|| MatchError::NotFound("Invoice not found".to_string()))?;
        let approved = approved.map_err(|source| read_failed("approved matches", source))?;

        let proposal = build_proposal(&transaction, &invoice, &approved, requested_amount)?;
        let label = classify(&proposal);

        tracing::info!(
            proposed = %proposal.proposed,
            invoice_balance = %proposal.invoice_balance,
            remaining_on_transaction = %proposal.remaining_on_transaction,
            label = %label,
            "Manual match proposal built"
        );

        let pending = PendingMatch {
            bank_transaction_id,
            invoice_id,
            proposal,
            label,
            notes,
        };
        let applied =
            apply_manual_match(store, self.applier.as_ref(), &self.audit, &pending, actor_user_id)
                .await?;
        let match_id = applied.match_id;

        // Everything below runs after the ledger commit.
        let transaction_state =
            recompute_transaction_state(store, &self.audit, bank_transaction_id, actor_user_id)
                .await
                .map_err(|e| committed(match_id, e))?;
        purge_stale_suggestions(store, bank_transaction_id, invoice_id).await;

        let (reloaded_invoice, approved_for_invoice) = tokio::join!(
            store.get_invoice(invoice_id),
            store.list_approved_matches_for_invoice(invoice_id),
        );
        let reloaded_invoice = reloaded_invoice
            .map_err(|source| follow_up_failed(match_id, "invoice", source))?
            .ok_or_else(|| {
                follow_up_failed(
                    match_id,
                    "invoice",
                    StoreError::NotFound(format!("invoice {}", invoice_id)),
                )
            })?;
        let approved_for_invoice = approved_for_invoice
            .map_err(|source| follow_up_failed(match_id, "invoice matches", source))?;
        check_invoice_settlement(&reloaded_invoice, &approved_for_invoice);

        let funding = if reloaded_invoice.is_paid() {
            Some(
                run_funding_cascade(store, &self.audit, &reloaded_invoice, match_id, actor_user_id)
                    .await?,
            )
        } else {
            None
        };

        let (bank_transaction, invoice, matches) = self
            .reload_post_state(match_id, bank_transaction_id, invoice_id)
            .await?;
        let total_matched_amount = total_matched(&matches);

        tracing::info!(
            match_id = %match_id,
            applied_amount = %proposal.proposed,
            label = %label,
            transaction_status = %bank_transaction.status,
            invoice_status = %invoice.status,
            "Manual match completed"
        );

        Ok(ManualMatchOutcome {
            match_id,
            applied_amount: proposal.proposed,
            classification: label,
            bank_transaction,
            invoice,
            matches,
            total_matched_amount,
            transaction_state,
            funding,
        })
    }

    async fn reload_post_state(
        &self,
        match_id: Uuid,
        bank_transaction_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<(BankTransaction, Invoice, Vec<MatchDetail>), MatchError> {
        let store = self.store.as_ref();
        let (transaction, invoice, matches) = tokio::join!(
            store.get_bank_transaction(bank_transaction_id),
            store.get_invoice(invoice_id),
            store.list_match_details(bank_transaction_id),
        );

        let transaction = transaction
            .map_err(|source| follow_up_failed(match_id, "bank transaction", source))?
            .ok_or_else(|| {
                follow_up_failed(
                    match_id,
                    "bank transaction",
                    StoreError::NotFound(format!("bank transaction {}", bank_transaction_id)),
                )
            })?;
        let invoice = invoice
            .map_err(|source| follow_up_failed(match_id, "invoice", source))?
            .ok_or_else(|| {
                follow_up_failed(
                    match_id,
                    "invoice",
                    StoreError::NotFound(format!("invoice {}", invoice_id)),
                )
            })?;
        let matches = matches.map_err(|source| follow_up_failed(match_id, "matches", source))?;

        Ok((transaction, invoice, matches))
    }

    /// Recompute a bank transaction's settlement state from its approved
    /// matches. Safe to run repeatedly, e.g. from a repair job.
    pub async fn recompute(
        &self,
        bank_transaction_id: Uuid,
        actor_user_id: &str,
    ) -> Result<TransactionState, MatchError> {
        recompute_transaction_state(
            self.store.as_ref(),
            &self.audit,
            bank_transaction_id,
            actor_user_id,
        )
        .await
    }

    pub async fn transaction_matches(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<TransactionMatches, MatchError> {
        let store = self.store.as_ref();
        let (transaction, matches) = tokio::join!(
            store.get_bank_transaction(bank_transaction_id),
            store.list_match_details(bank_transaction_id),
        );

        let bank_transaction = transaction
            .map_err(|source| read_failed("bank transaction", source))?
            .ok_or_else(|| MatchError::NotFound("Bank transaction not found".to_string()))?;
        let matches = matches.map_err(|source| read_failed("matches", source))?;
        let total_matched_amount = total_matched(&matches);

        Ok(TransactionMatches {
            bank_transaction,
            matches,
            total_matched_amount,
        })
    }
}

/// Log when the apply operation left the invoice in a state its approved
/// allocations do not support. Reporting only; the ledger owns the fix.
fn check_invoice_settlement(invoice: &Invoice, approved_for_invoice: &[ReconciliationMatch]) {
    let settlement = derive_invoice_settlement(invoice, approved_for_invoice);

    if invoice.is_paid() && !may_be_marked_paid(invoice, approved_for_invoice) {
        tracing::warn!(
            invoice_id = %invoice.invoice_id,
            total = %invoice.total,
            matched_total = %settlement.matched_total,
            "Invoice is paid but approved allocations do not reach its total"
        );
    }
    if !balance_is_consistent(invoice) {
        tracing::warn!(
            invoice_id = %invoice.invoice_id,
            stored_balance_due = ?invoice.balance_due,
            derived_balance_due = %settlement.balance_due,
            "Stored balance due disagrees with total minus paid amount"
        );
    }
}

fn total_matched(matches: &[MatchDetail]) -> Decimal {
    round2(
        matches
            .iter()
            .map(|m| m.reconciliation_match.matched_amount)
            .sum(),
    )
}

fn read_failed(what: &'static str, source: StoreError) -> MatchError {
    tracing::error!(error = %source, what = what, "Failed to load reconciliation context");
    MatchError::ReadFailed { what, source }
}

fn follow_up_failed(match_id: Uuid, what: &'static str, source: StoreError) -> MatchError {
    tracing::error!(
        error = %source,
        match_id = %match_id,
        what = what,
        committed = true,
        "Match committed but post-state reload failed"
    );
    MatchError::FollowUpReadFailed {
        match_id,
        what,
        source,
    }
}

/// Recompute runs after the commit, so its read failures are reporting
/// failures rather than pre-commit read failures.
fn committed(match_id: Uuid, err: MatchError) -> MatchError {
    match err {
        MatchError::ReadFailed { what, source } => follow_up_failed(match_id, what, source),
        MatchError::NotFound(msg) => {
            follow_up_failed(match_id, "bank transaction", StoreError::NotFound(msg))
        }
        other => {
            tracing::error!(
                error = %other,
                match_id = %match_id,
                committed = true,
                "Settlement recompute failed after commit"
            );
            other
        }
    }
}
