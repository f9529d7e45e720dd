//! Bank transaction settlement state, always derived from the full set of
//! approved matches and never patched incrementally.

use super::amount::{approx_equal, is_negligible, round2};
use super::error::MatchError;
use super::proposal::approved_total;
use crate::models::{BankTransaction, BankTransactionStatus, ReconciliationMatch};
use crate::services::audit::{actions, entities, AuditRecorder};
use crate::services::LedgerStore;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::instrument;
use uuid::Uuid;

/// Canonical derived state of a bank transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionState {
    pub bank_transaction_id: Uuid,
    pub status: BankTransactionStatus,
    pub matched_invoice_ids: Vec<Uuid>,
    pub total_matched: Decimal,
    /// Whether the stored row had to be rewritten.
    pub changed: bool,
}

/// Status implied by `total_matched` against the gross transaction amount.
pub fn derive_status(total_matched: Decimal, amount: Decimal) -> BankTransactionStatus {
    if is_negligible(total_matched) {
        BankTransactionStatus::Unmatched
    } else if approx_equal(total_matched, amount) {
        BankTransactionStatus::Matched
    } else {
        BankTransactionStatus::PartiallyMatched
    }
}

/// Distinct invoice ids across the approved matches, sorted.
pub fn linked_invoice_ids(approved: &[ReconciliationMatch]) -> Vec<Uuid> {
    approved
        .iter()
        .filter(|m| m.is_approved())
        .map(|m| m.invoice_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn same_invoice_set(stored: &[Uuid], derived: &[Uuid]) -> bool {
    let stored: BTreeSet<&Uuid> = stored.iter().collect();
    let derived: BTreeSet<&Uuid> = derived.iter().collect();
    stored == derived
}

/// Work out the state a transaction should have and whether its row differs.
pub fn derive_transaction_state(
    transaction: &BankTransaction,
    approved: &[ReconciliationMatch],
) -> TransactionState {
    let total_matched = round2(approved_total(approved));
    let status = derive_status(total_matched, transaction.amount);
    let matched_invoice_ids = linked_invoice_ids(approved);

    let changed = transaction.status != status.as_str()
        || !same_invoice_set(&transaction.matched_invoice_ids, &matched_invoice_ids);

    TransactionState {
        bank_transaction_id: transaction.bank_transaction_id,
        status,
        matched_invoice_ids,
        total_matched,
        changed,
    }
}

/// Re-read the transaction and its approved matches, and write the derived
/// status and invoice set back only when they differ from what is stored.
///
/// Idempotent: a second call with no intervening approvals writes nothing.
#[instrument(skip(store, audit), fields(bank_transaction_id = %bank_transaction_id))]
pub async fn recompute_transaction_state(
    store: &dyn LedgerStore,
    audit: &AuditRecorder,
    bank_transaction_id: Uuid,
    actor_user_id: &str,
) -> Result<TransactionState, MatchError> {
    let (transaction, approved) = tokio::join!(
        store.get_bank_transaction(bank_transaction_id),
        store.list_approved_matches(bank_transaction_id),
    );

    let transaction = transaction
        .map_err(|source| MatchError::ReadFailed {
            what: "bank transaction",
            source,
        })?
        .ok_or_else(|| MatchError::NotFound("Bank transaction not found".to_string()))?;
    let approved = approved.map_err(|source| MatchError::ReadFailed {
        what: "approved matches",
        source,
    })?;

    let state = derive_transaction_state(&transaction, &approved);
    if !state.changed {
        tracing::debug!(status = %state.status.as_str(), "Bank transaction state unchanged");
        return Ok(state);
    }

    store
        .update_bank_transaction_state(
            bank_transaction_id,
            state.status,
            &state.matched_invoice_ids,
        )
        .await
        .map_err(|source| MatchError::StateUpdateFailed {
            bank_transaction_id,
            source,
        })?;

    tracing::info!(
        previous_status = %transaction.status,
        new_status = %state.status.as_str(),
        total_matched = %state.total_matched,
        linked_invoices = state.matched_invoice_ids.len(),
        "Bank transaction settlement state updated"
    );

    audit
        .record(
            actor_user_id,
            actions::TRANSACTION_SETTLEMENT_UPDATED,
            entities::BANK_TRANSACTION,
            bank_transaction_id,
            json!({
                "previous": {
                    "status": transaction.status,
                    "matched_invoice_ids": transaction.matched_invoice_ids,
                },
                "new": {
                    "status": state.status.as_str(),
                    "matched_invoice_ids": state.matched_invoice_ids,
                },
                "total_matched": state.total_matched,
            }),
        )
        .await;

    Ok(state)
}

/// Drop leftover auto-match suggestions for a pair that now has a decision.
/// Cleanup only: failures are logged, not raised.
pub async fn purge_stale_suggestions(
    store: &dyn LedgerStore,
    bank_transaction_id: Uuid,
    invoice_id: Uuid,
) {
    match store
        .delete_stale_suggestions(bank_transaction_id, invoice_id)
        .await
    {
        Ok(0) => {}
        Ok(removed) => {
            tracing::info!(
                bank_transaction_id = %bank_transaction_id,
                invoice_id = %invoice_id,
                removed = removed,
                "Removed stale match suggestions"
            );
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                bank_transaction_id = %bank_transaction_id,
                invoice_id = %invoice_id,
                "Failed to remove stale match suggestions"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::proposal::fixtures::{approved, transaction};
    use rust_decimal_macros::dec;

    #[test]
    fn status_thresholds() {
        assert_eq!(derive_status(dec!(0), dec!(1000)), BankTransactionStatus::Unmatched);
        assert_eq!(derive_status(dec!(0.01), dec!(1000)), BankTransactionStatus::Unmatched);
        assert_eq!(
            derive_status(dec!(400), dec!(1000)),
            BankTransactionStatus::PartiallyMatched
        );
        assert_eq!(derive_status(dec!(999.99), dec!(1000)), BankTransactionStatus::Matched);
    }

    #[test]
    fn invoice_set_is_distinct_and_order_insensitive() {
        let mut tx = transaction(dec!(1000));
        let mut a = approved(&tx, dec!(100));
        let mut b = approved(&tx, dec!(200));
        let c_invoice = Uuid::new_v4();
        a.invoice_id = c_invoice;
        b.invoice_id = c_invoice;
        let d = approved(&tx, dec!(300));

        let state = derive_transaction_state(&tx, &[a.clone(), b.clone(), d.clone()]);
        assert_eq!(state.matched_invoice_ids.len(), 2);
        assert_eq!(state.total_matched, dec!(600));
        assert!(state.changed);

        tx.status = "partially_matched".to_string();
        tx.matched_invoice_ids = vec![d.invoice_id, c_invoice];
        let again = derive_transaction_state(&tx, &[d, a, b]);
        assert!(!again.changed);
    }

    #[test]
    fn non_approved_matches_are_ignored() {
        let tx = transaction(dec!(1000));
        let mut pending = approved(&tx, dec!(1000));
        pending.status = "suggested".to_string();

        let state = derive_transaction_state(&tx, &[pending]);
        assert_eq!(state.status, BankTransactionStatus::Unmatched);
        assert!(state.matched_invoice_ids.is_empty());
        assert!(!state.changed);
    }
}
