//! Storage seams used by the matching engine.
//!
//! The engine never talks to a database directly. It reads and writes through
//! [`LedgerStore`], commits allocations through the [`ApplyMatch`] capability
//! and records audit entries through [`AuditSink`].

use crate::models::{
    AuditLogEntry, BankTransaction, BankTransactionStatus, FeeEvent, Invoice, MatchDetail,
    NewMatch, ReconciliationMatch, Subscription, SubscriptionStatus,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Reservation or state precondition lost to a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Reads and settlement-derived writes over the ledgers the engine touches.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn get_bank_transaction(&self, id: Uuid) -> Result<Option<BankTransaction>, StoreError>;

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Every approved match on the bank transaction, across all invoices.
    async fn list_approved_matches(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError>;

    /// Every approved match against the invoice, across all transactions.
    async fn list_approved_matches_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError>;

    /// Approved matches on the transaction with invoice/investor/deal projections.
    async fn list_match_details(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Vec<MatchDetail>, StoreError>;

    /// Insert a `suggested` match, reserving its amount against the bank
    /// transaction. Fails with [`StoreError::Conflict`] when approved plus
    /// in-flight manual allocations would exceed the transaction amount.
    async fn insert_suggested_match(
        &self,
        new_match: &NewMatch,
    ) -> Result<ReconciliationMatch, StoreError>;

    async fn delete_match(&self, match_id: Uuid) -> Result<(), StoreError>;

    async fn update_bank_transaction_state(
        &self,
        bank_transaction_id: Uuid,
        status: BankTransactionStatus,
        matched_invoice_ids: &[Uuid],
    ) -> Result<BankTransaction, StoreError>;

    /// Remove unapproved auto-match suggestions for the pair. Returns the count.
    async fn delete_stale_suggestions(
        &self,
        bank_transaction_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Mark the invoice's accrued/invoiced fee events as paid and return them
    /// as they were before the update.
    async fn settle_fee_events(&self, invoice_id: Uuid) -> Result<Vec<FeeEvent>, StoreError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, StoreError>;

    async fn update_subscription_funding(
        &self,
        subscription_id: Uuid,
        funded_amount: Decimal,
        status: SubscriptionStatus,
    ) -> Result<Subscription, StoreError>;
}

/// The external all-or-nothing apply operation.
///
/// Flips the match to `approved` and updates the invoice's paid amount,
/// balance, status and paid timestamp as one unit. Must reject a second call
/// for the same match and leave no partial effect on failure.
#[async_trait]
pub trait ApplyMatch: Send + Sync {
    async fn apply_match(&self, match_id: Uuid, approved_by: &str) -> Result<(), StoreError>;
}

/// Append-only audit write target.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
}
