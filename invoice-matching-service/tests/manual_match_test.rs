//! Manual match flow against the in-memory ledger.

mod common;

use common::{request, spawn_app, ACTOR};
use invoice_matching_service::matching::{MatchClassification, MatchError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn exact_match_settles_both_sides() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(1000.00), dec!(0)).await;

    let outcome = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("match should apply");

    assert_eq!(outcome.applied_amount, dec!(1000.00));
    assert_eq!(outcome.classification, MatchClassification::Exact);
    assert_eq!(outcome.bank_transaction.status, "matched");
    assert_eq!(outcome.bank_transaction.matched_invoice_ids, vec![invoice.invoice_id]);
    assert_eq!(outcome.invoice.status, "paid");
    assert!(outcome.invoice.paid_at.is_some());
    assert_eq!(outcome.invoice.balance_due, Some(Decimal::ZERO));
    assert_eq!(outcome.total_matched_amount, dec!(1000.00));

    assert_eq!(outcome.matches.len(), 1);
    let detail = &outcome.matches[0];
    assert_eq!(detail.reconciliation_match.match_id, outcome.match_id);
    assert_eq!(detail.reconciliation_match.status, "approved");
    assert_eq!(detail.reconciliation_match.approved_by.as_deref(), Some(ACTOR));
    assert_eq!(detail.reconciliation_match.match_confidence, 100);
    assert_eq!(
        detail.reconciliation_match.match_reason.as_deref(),
        Some("Manual match (exact)")
    );
}

#[tokio::test]
async fn split_match_leaves_transaction_partially_matched() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(400.00), dec!(0)).await;

    let outcome = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("match should apply");

    assert_eq!(outcome.applied_amount, dec!(400.00));
    assert_eq!(outcome.classification, MatchClassification::Split);
    assert_eq!(outcome.bank_transaction.status, "partially_matched");
    assert!(outcome
        .bank_transaction
        .matched_invoice_ids
        .contains(&invoice.invoice_id));
    assert_eq!(outcome.invoice.status, "paid");
}

#[tokio::test]
async fn combined_match_consumes_transaction_but_not_invoice() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(300.00)).await;
    let invoice = app.seed_invoice(dec!(1000.00), dec!(0)).await;

    let outcome = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("match should apply");

    assert_eq!(outcome.applied_amount, dec!(300.00));
    assert_eq!(outcome.classification, MatchClassification::Combined);
    assert_eq!(outcome.bank_transaction.status, "matched");
    assert_ne!(outcome.invoice.status, "paid");
    assert_eq!(outcome.invoice.paid_amount, dec!(300.00));
    assert_eq!(outcome.invoice.balance_due, Some(dec!(700.00)));
    assert_eq!(outcome.invoice.match_status, "partially_matched");
    assert!(outcome.invoice.paid_at.is_none());
}

#[tokio::test]
async fn paying_stored_balance_due_settles_invoice_and_cascades() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let mut invoice = app.seed_invoice(dec!(1000.00), dec!(0)).await;
    invoice.balance_due = Some(dec!(150.00));
    app.store.insert_invoice(invoice.clone()).await;
    let subscription = app
        .seed_subscription(dec!(1000.00), dec!(0), "committed")
        .await;
    app.seed_fee_event(
        invoice.invoice_id,
        subscription.subscription_id,
        "flat",
        dec!(150.00),
        "invoiced",
    )
    .await;

    let outcome = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("match should apply");

    assert_eq!(outcome.applied_amount, dec!(150.00));
    assert_eq!(outcome.classification, MatchClassification::Split);
    assert_eq!(outcome.invoice.status, "paid");
    assert_eq!(outcome.invoice.balance_due, Some(Decimal::ZERO));
    assert_eq!(outcome.invoice.paid_amount, dec!(150.00));
    assert!(outcome.invoice.paid_at.is_some());
    assert!(outcome.funding.is_some());
}

#[tokio::test]
async fn exhausted_transaction_is_rejected_without_creating_a_match() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(500.00)).await;
    let earlier = app.seed_invoice(dec!(500.00), dec!(500.00)).await;
    app.seed_approved_match(&tx, earlier.invoice_id, dec!(500.00))
        .await;
    let invoice = app.seed_invoice(dec!(200.00), dec!(0)).await;

    let err = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::Validation(ref m) if m.contains("no remaining funds")));
    assert_eq!(app.store.matches().await.len(), 1);
    assert!(app.store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn requested_amount_clamps_allocation() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(800.00), dec!(0)).await;

    let mut req = request(&tx, &invoice);
    req.requested_amount = Some(dec!(250.00));
    req.notes = Some("Wire ref 7781".to_string());

    let outcome = app
        .engine
        .create_manual_match(req, ACTOR)
        .await
        .expect("match should apply");

    assert_eq!(outcome.applied_amount, dec!(250.00));
    assert_eq!(outcome.classification, MatchClassification::Partial);
    assert_eq!(outcome.invoice.status, "partially_paid");
    assert_eq!(
        outcome.matches[0].reconciliation_match.match_reason.as_deref(),
        Some("Manual match (partial): Wire ref 7781")
    );
    assert_eq!(
        outcome.matches[0].reconciliation_match.notes.as_deref(),
        Some("Wire ref 7781")
    );
}

#[tokio::test]
async fn successive_matches_converge_on_transaction_state() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let first = app.seed_investor_invoice(dec!(600.00)).await;
    let second = app.seed_invoice(dec!(900.00), dec!(0)).await;

    let one = app
        .engine
        .create_manual_match(request(&tx, &first), ACTOR)
        .await
        .expect("first match should apply");
    assert_eq!(one.bank_transaction.status, "partially_matched");

    let two = app
        .engine
        .create_manual_match(request(&tx, &second), ACTOR)
        .await
        .expect("second match should apply");

    assert_eq!(two.applied_amount, dec!(400.00));
    assert_eq!(two.classification, MatchClassification::Combined);
    assert_eq!(two.bank_transaction.status, "matched");
    assert_eq!(two.total_matched_amount, dec!(1000.00));
    assert_eq!(two.matches.len(), 2);

    let mut linked = two.bank_transaction.matched_invoice_ids.clone();
    linked.sort();
    let mut expected = vec![first.invoice_id, second.invoice_id];
    expected.sort();
    assert_eq!(linked, expected);

    let with_projection = two
        .matches
        .iter()
        .find(|m| m.reconciliation_match.invoice_id == first.invoice_id)
        .and_then(|m| m.invoice.as_ref())
        .expect("invoice projection");
    assert_eq!(
        with_projection.investor.as_ref().map(|i| i.legal_name.as_str()),
        Some("Harbor Family Office")
    );
    assert_eq!(
        with_projection.deal.as_ref().map(|d| d.name.as_str()),
        Some("Fund III Series A")
    );
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(100.00)).await;
    let invoice = app.seed_invoice(dec!(100.00), dec!(0)).await;

    let mut missing_invoice = request(&tx, &invoice);
    missing_invoice.invoice_id = uuid::Uuid::new_v4();
    let err = app
        .engine
        .create_manual_match(missing_invoice, ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::NotFound(ref m) if m == "Invoice not found"));

    let mut missing_tx = request(&tx, &invoice);
    missing_tx.bank_transaction_id = uuid::Uuid::new_v4();
    let err = app
        .engine
        .create_manual_match(missing_tx, ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::NotFound(ref m) if m == "Bank transaction not found"));
}

#[tokio::test]
async fn currency_mismatch_is_rejected() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(100.00)).await;
    let mut invoice = app.seed_invoice(dec!(100.00), dec!(0)).await;
    invoice.currency = Some("EUR".to_string());
    app.store.insert_invoice(invoice.clone()).await;

    let err = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::Validation(ref m) if m.contains("Currency mismatch")));
    assert!(app.store.matches().await.is_empty());
}

#[tokio::test]
async fn read_failure_before_commit_creates_nothing() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(100.00)).await;
    let invoice = app.seed_invoice(dec!(100.00), dec!(0)).await;
    app.store.fail_reads(true);

    let err = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::ReadFailed { .. }));
    assert!(app.store.matches().await.is_empty());
}

#[tokio::test]
async fn follow_up_read_failure_reports_committed_match() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(1000.00), dec!(0)).await;
    app.store.fail_match_details(true);

    let err = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .unwrap_err();

    let MatchError::FollowUpReadFailed { match_id, .. } = err else {
        panic!("expected follow-up read failure, got {err:?}");
    };

    // The ledger side already committed.
    let matches = app.store.matches().await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].match_id, match_id);
    assert_eq!(matches[0].status, "approved");
}

#[tokio::test]
async fn audit_trail_records_each_state_change_once() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(400.00), dec!(0)).await;

    app.engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("match should apply");

    let actions: Vec<String> = app
        .store
        .audit_entries()
        .await
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            "reconciliation_match.approved".to_string(),
            "bank_transaction.settlement_updated".to_string(),
        ]
    );
    assert!(app
        .store
        .audit_entries()
        .await
        .iter()
        .all(|e| e.actor_user_id == ACTOR));
}

#[tokio::test]
async fn audit_failures_do_not_fail_the_match() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let invoice = app.seed_invoice(dec!(1000.00), dec!(0)).await;
    app.store.fail_audit(true);

    let outcome = app
        .engine
        .create_manual_match(request(&tx, &invoice), ACTOR)
        .await
        .expect("audit is best-effort");

    assert_eq!(outcome.bank_transaction.status, "matched");
    assert!(app.store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn concurrent_matches_never_over_allocate() {
    let app = spawn_app();
    let tx = app.seed_transaction(dec!(1000.00)).await;
    let a = app.seed_invoice(dec!(700.00), dec!(0)).await;
    let b = app.seed_invoice(dec!(700.00), dec!(0)).await;

    let (first, second) = tokio::join!(
        app.engine.create_manual_match(request(&tx, &a), ACTOR),
        app.engine.create_manual_match(request(&tx, &b), "staff-7"),
    );

    let total: Decimal = [first, second]
        .into_iter()
        .filter_map(Result::ok)
        .map(|o| o.applied_amount)
        .sum();
    assert!(total <= dec!(1000.00));

    let approved: Decimal = app
        .store
        .matches()
        .await
        .iter()
        .filter(|m| m.status == "approved")
        .map(|m| m.matched_amount)
        .sum();
    assert!(approved <= dec!(1000.00));
}
