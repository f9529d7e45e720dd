//! In-process ledger store.
//!
//! Mirrors the Postgres store's semantics (reservation on insert, one-shot
//! apply, pre-update fee event snapshots) and adds switches that make
//! individual writes fail, so error paths can be driven from tests.

use crate::matching::amount::{round2, AMOUNT_EPSILON};
use crate::matching::settlement::book_payment;
use crate::models::{
    AuditLogEntry, BankTransaction, BankTransactionStatus, DealSummary, FeeEvent, FeeEventStatus,
    InvestorSummary, Invoice, InvoiceSummary, MatchDetail, MatchStatus, MatchType, NewMatch,
    ReconciliationMatch, Subscription, SubscriptionStatus,
};
use crate::services::{ApplyMatch, AuditSink, LedgerStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    bank_transactions: HashMap<Uuid, BankTransaction>,
    invoices: HashMap<Uuid, Invoice>,
    investors: HashMap<Uuid, InvestorSummary>,
    deals: HashMap<Uuid, DealSummary>,
    /// Insertion order is kept so listings are stable.
    matches: Vec<ReconciliationMatch>,
    subscriptions: HashMap<Uuid, Subscription>,
    fee_events: Vec<FeeEvent>,
    audit_log: Vec<AuditLogEntry>,
    transaction_writes: usize,
}

/// Writes that can be made to fail on demand.
#[derive(Default)]
struct Failures {
    apply: AtomicBool,
    delete_match: AtomicBool,
    subscription_update: AtomicBool,
    audit: AtomicBool,
    fee_settlement: AtomicBool,
    reads: AtomicBool,
    match_details: AtomicBool,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
    failures: Failures,
}

fn injected(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("injected failure: {}", operation))
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub async fn insert_bank_transaction(&self, transaction: BankTransaction) {
        let mut state = self.state.lock().await;
        state
            .bank_transactions
            .insert(transaction.bank_transaction_id, transaction);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        let mut state = self.state.lock().await;
        state.invoices.insert(invoice.invoice_id, invoice);
    }

    pub async fn insert_investor(&self, investor: InvestorSummary) {
        let mut state = self.state.lock().await;
        state.investors.insert(investor.investor_id, investor);
    }

    pub async fn insert_deal(&self, deal: DealSummary) {
        let mut state = self.state.lock().await;
        state.deals.insert(deal.deal_id, deal);
    }

    pub async fn insert_match(&self, reconciliation_match: ReconciliationMatch) {
        let mut state = self.state.lock().await;
        state.matches.push(reconciliation_match);
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .insert(subscription.subscription_id, subscription);
    }

    pub async fn insert_fee_event(&self, fee_event: FeeEvent) {
        let mut state = self.state.lock().await;
        state.fee_events.push(fee_event);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every match row, whatever its status.
    pub async fn matches(&self) -> Vec<ReconciliationMatch> {
        self.state.lock().await.matches.clone()
    }

    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.audit_log.clone()
    }

    pub async fn fee_events(&self) -> Vec<FeeEvent> {
        self.state.lock().await.fee_events.clone()
    }

    pub async fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.state.lock().await.subscriptions.get(&id).cloned()
    }

    /// Number of times a bank transaction row has been rewritten.
    pub async fn transaction_writes(&self) -> usize {
        self.state.lock().await.transaction_writes
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    pub fn fail_apply(&self, fail: bool) {
        self.failures.apply.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete_match(&self, fail: bool) {
        self.failures.delete_match.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscription_update(&self, fail: bool) {
        self.failures.subscription_update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit(&self, fail: bool) {
        self.failures.audit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fee_settlement(&self, fail: bool) {
        self.failures.fee_settlement.store(fail, Ordering::SeqCst);
    }

    /// Make every read of transactions, invoices and matches fail.
    pub fn fail_reads(&self, fail: bool) {
        self.failures.reads.store(fail, Ordering::SeqCst);
    }

    /// Make only the match detail projection fail.
    pub fn fail_match_details(&self, fail: bool) {
        self.failures.match_details.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(injected(operation))
        } else {
            Ok(())
        }
    }
}

fn approved_on<'a>(
    matches: &'a [ReconciliationMatch],
    predicate: impl Fn(&ReconciliationMatch) -> bool + 'a,
) -> impl Iterator<Item = &'a ReconciliationMatch> + 'a {
    matches
        .iter()
        .filter(move |m| m.is_approved() && predicate(*m))
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.check(&self.failures.reads, "health_check")
    }

    async fn get_bank_transaction(&self, id: Uuid) -> Result<Option<BankTransaction>, StoreError> {
        self.check(&self.failures.reads, "get_bank_transaction")?;
        Ok(self.state.lock().await.bank_transactions.get(&id).cloned())
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        self.check(&self.failures.reads, "get_invoice")?;
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn list_approved_matches(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError> {
        self.check(&self.failures.reads, "list_approved_matches")?;
        let state = self.state.lock().await;
        Ok(
            approved_on(&state.matches, |m| m.bank_transaction_id == bank_transaction_id)
                .cloned()
                .collect(),
        )
    }

    async fn list_approved_matches_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError> {
        self.check(&self.failures.reads, "list_approved_matches_for_invoice")?;
        let state = self.state.lock().await;
        Ok(approved_on(&state.matches, |m| m.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn list_match_details(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Vec<MatchDetail>, StoreError> {
        self.check(&self.failures.reads, "list_match_details")?;
        self.check(&self.failures.match_details, "list_match_details")?;
        let state = self.state.lock().await;
        let details = approved_on(&state.matches, |m| m.bank_transaction_id == bank_transaction_id)
            .map(|m| {
                let invoice = state.invoices.get(&m.invoice_id).map(|inv| InvoiceSummary {
                    invoice_id: inv.invoice_id,
                    invoice_number: inv.invoice_number.clone(),
                    total: inv.total,
                    status: inv.status.clone(),
                    investor: inv
                        .investor_id
                        .and_then(|id| state.investors.get(&id).cloned()),
                    deal: inv.deal_id.and_then(|id| state.deals.get(&id).cloned()),
                });
                MatchDetail {
                    reconciliation_match: m.clone(),
                    invoice,
                }
            })
            .collect();
        Ok(details)
    }

    async fn insert_suggested_match(
        &self,
        new_match: &NewMatch,
    ) -> Result<ReconciliationMatch, StoreError> {
        let mut state = self.state.lock().await;

        let amount = state
            .bank_transactions
            .get(&new_match.bank_transaction_id)
            .map(|t| t.amount)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "bank transaction {}",
                    new_match.bank_transaction_id
                ))
            })?;

        let reserved: Decimal = state
            .matches
            .iter()
            .filter(|m| m.bank_transaction_id == new_match.bank_transaction_id)
            .filter(|m| {
                m.is_approved()
                    || (MatchStatus::from_str(&m.status) == MatchStatus::Suggested
                        && MatchType::from_str(&m.match_type) == MatchType::Manual)
            })
            .map(|m| m.matched_amount)
            .sum();

        if round2(reserved + new_match.matched_amount) > amount + AMOUNT_EPSILON {
            return Err(StoreError::Conflict(format!(
                "reserving {} would exceed transaction amount {} ({} already reserved)",
                new_match.matched_amount, amount, reserved
            )));
        }

        let inserted = ReconciliationMatch {
            match_id: Uuid::new_v4(),
            bank_transaction_id: new_match.bank_transaction_id,
            invoice_id: new_match.invoice_id,
            matched_amount: new_match.matched_amount,
            match_type: new_match.match_type.as_str().to_string(),
            match_confidence: new_match.match_confidence,
            match_reason: Some(new_match.match_reason.clone()),
            status: MatchStatus::Suggested.as_str().to_string(),
            notes: new_match.notes.clone(),
            approved_at: None,
            approved_by: None,
            created_utc: Utc::now(),
        };
        state.matches.push(inserted.clone());
        Ok(inserted)
    }

    async fn delete_match(&self, match_id: Uuid) -> Result<(), StoreError> {
        self.check(&self.failures.delete_match, "delete_match")?;
        let mut state = self.state.lock().await;
        let before = state.matches.len();
        state.matches.retain(|m| m.match_id != match_id);
        if state.matches.len() == before {
            return Err(StoreError::NotFound(format!("match {}", match_id)));
        }
        Ok(())
    }

    async fn update_bank_transaction_state(
        &self,
        bank_transaction_id: Uuid,
        status: BankTransactionStatus,
        matched_invoice_ids: &[Uuid],
    ) -> Result<BankTransaction, StoreError> {
        let mut state = self.state.lock().await;
        let transaction = state
            .bank_transactions
            .get_mut(&bank_transaction_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("bank transaction {}", bank_transaction_id))
            })?;
        transaction.status = status.as_str().to_string();
        transaction.matched_invoice_ids = matched_invoice_ids.to_vec();
        transaction.updated_utc = Utc::now();
        let updated = transaction.clone();
        state.transaction_writes += 1;
        Ok(updated)
    }

    async fn delete_stale_suggestions(
        &self,
        bank_transaction_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.matches.len();
        state.matches.retain(|m| {
            !(m.bank_transaction_id == bank_transaction_id
                && m.invoice_id == invoice_id
                && MatchStatus::from_str(&m.status) == MatchStatus::Suggested
                && MatchType::from_str(&m.match_type) != MatchType::Manual)
        });
        Ok((before - state.matches.len()) as u64)
    }

    async fn settle_fee_events(&self, invoice_id: Uuid) -> Result<Vec<FeeEvent>, StoreError> {
        self.check(&self.failures.fee_settlement, "settle_fee_events")?;
        let mut state = self.state.lock().await;
        let mut settled = Vec::new();
        for event in state.fee_events.iter_mut() {
            if event.invoice_id == Some(invoice_id)
                && FeeEventStatus::from_str(&event.status).is_outstanding()
            {
                settled.push(event.clone());
                event.status = FeeEventStatus::Paid.as_str().to_string();
            }
        }
        Ok(settled)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Ok(self.state.lock().await.subscriptions.get(&id).cloned())
    }

    async fn update_subscription_funding(
        &self,
        subscription_id: Uuid,
        funded_amount: Decimal,
        status: SubscriptionStatus,
    ) -> Result<Subscription, StoreError> {
        self.check(&self.failures.subscription_update, "update_subscription_funding")?;
        let mut state = self.state.lock().await;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", subscription_id)))?;
        subscription.funded_amount = funded_amount;
        subscription.status = status.as_str().to_string();
        subscription.updated_utc = Utc::now();
        Ok(subscription.clone())
    }
}

#[async_trait]
impl ApplyMatch for InMemoryLedgerStore {
    async fn apply_match(&self, match_id: Uuid, approved_by: &str) -> Result<(), StoreError> {
        self.check(&self.failures.apply, "apply_match")?;
        let mut state = self.state.lock().await;

        let position = state
            .matches
            .iter()
            .position(|m| m.match_id == match_id)
            .ok_or_else(|| StoreError::NotFound(format!("match {}", match_id)))?;

        let pending = state.matches[position].clone();
        if MatchStatus::from_str(&pending.status) != MatchStatus::Suggested {
            return Err(StoreError::Conflict(format!(
                "match {} is {}, not suggested",
                match_id, pending.status
            )));
        }

        let invoice = state
            .invoices
            .get(&pending.invoice_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", pending.invoice_id)))?;

        // Nothing is written until every check above has passed.
        let now = Utc::now();
        let approved = &mut state.matches[position];
        approved.status = MatchStatus::Approved.as_str().to_string();
        approved.approved_at = Some(now);
        approved.approved_by = Some(approved_by.to_string());

        let approved_for_invoice: Vec<ReconciliationMatch> =
            approved_on(&state.matches, |m| m.invoice_id == invoice.invoice_id)
                .cloned()
                .collect();
        let payment = book_payment(&invoice, pending.matched_amount, &approved_for_invoice);

        if let Some(stored) = state.invoices.get_mut(&invoice.invoice_id) {
            stored.paid_amount = payment.paid_amount;
            stored.balance_due = Some(payment.balance_due);
            stored.status = payment.status.as_str().to_string();
            stored.match_status = payment.match_status.as_str().to_string();
            if payment.settled {
                stored.paid_at = Some(now);
            }
            stored.updated_utc = now;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for InMemoryLedgerStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.check(&self.failures.audit, "append_audit_log")?;
        self.state.lock().await.audit_log.push(entry.clone());
        Ok(())
    }
}
