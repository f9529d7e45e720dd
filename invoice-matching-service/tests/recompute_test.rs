//! Standalone settlement recompute.

mod common;

use common::{request, spawn_app, ACTOR};
use invoice_matching_service::matching::MatchError;
use invoice_matching_service::models::BankTransactionStatus;
use rust_decimal_macros::dec;

#[tokio::test]
async fn recompute_repairs_drifted_state_once() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let a = app.seed_invoice(dec!(600.00), dec!(600.00)).await;
    let b = app.seed_invoice(dec!(400.00), dec!(400.00)).await;
    app.seed_approved_match(&tx, a.invoice_id, dec!(600.00)).await;
    app.seed_approved_match(&tx, b.invoice_id, dec!(400.00)).await;

    let first = app
        .engine
        .recompute(tx.bank_transaction_id, ACTOR)
        .await
        .expect("recompute");
    assert!(first.changed);
    assert_eq!(first.status, BankTransactionStatus::Matched);
    assert_eq!(first.total_matched, dec!(1000.00));
    assert_eq!(first.matched_invoice_ids.len(), 2);
    assert_eq!(app.store.transaction_writes().await, 1);

    let second = app
        .engine
        .recompute(tx.bank_transaction_id, ACTOR)
        .await
        .expect("recompute");
    assert!(!second.changed);
    assert_eq!(second.status, first.status);
    assert_eq!(app.store.transaction_writes().await, 1);

    let updates = app
        .store
        .audit_entries()
        .await
        .into_iter()
        .filter(|e| e.action == "bank_transaction.settlement_updated")
        .count();
    assert_eq!(updates, 1);
}

#[tokio::test]
async fn suggested_matches_do_not_count_towards_status() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(1000.00), dec!(0)).await;
    let other = app.seed_invoice(dec!(1000.00), dec!(0)).await;
    app.seed_approved_match(&tx, invoice.invoice_id, dec!(400.00))
        .await;
    app.seed_auto_suggestion(&tx, other.invoice_id, dec!(600.00))
        .await;

    let state = app
        .engine
        .recompute(tx.bank_transaction_id, ACTOR)
        .await
        .expect("recompute");

    assert_eq!(state.status, BankTransactionStatus::PartiallyMatched);
    assert_eq!(state.total_matched, dec!(400.00));
    assert_eq!(state.matched_invoice_ids, vec![invoice.invoice_id]);
}

#[tokio::test]
async fn stale_auto_suggestions_are_purged_after_manual_match() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(500.00)).await;
    let invoice = app.seed_invoice(dec!(500.00), dec!(0)).await;
    let stale = app
        .seed_auto_suggestion(&tx, invoice.invoice_id, dec!(500.00))
        .await;

    app.engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("match should apply");

    let remaining = app.store.matches().await;
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].match_id, stale.match_id);
    assert_eq!(remaining[0].status, "approved");
}

#[tokio::test]
async fn recompute_unknown_transaction_is_not_found() {
    let app = spawn_app();

    let err = app
        .engine
        .recompute(uuid::Uuid::new_v4(), ACTOR)
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::NotFound(_)));
}
