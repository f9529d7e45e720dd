//! Wire shapes for the reconciliation HTTP API.

use crate::matching::{to_amount, ManualMatchOutcome, TransactionMatches, TransactionState};
use crate::models::{BankTransaction, Invoice, MatchDetail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Body of `POST /api/reconciliation/matches`.
///
/// Ids stay as strings until validated so a missing or malformed id is a
/// 400 with a useful message rather than a generic body rejection.
#[derive(Debug, Default, Deserialize)]
pub struct CreateMatchRequest {
    pub bank_transaction_id: Option<String>,
    pub invoice_id: Option<String>,
    /// Number or numeric string; anything else is treated as absent.
    pub matched_amount: Option<Value>,
    pub notes: Option<String>,
}

impl CreateMatchRequest {
    pub fn bank_transaction_id(&self) -> Result<Uuid, String> {
        parse_id("bank_transaction_id", self.bank_transaction_id.as_deref())
    }

    pub fn invoice_id(&self) -> Result<Uuid, String> {
        parse_id("invoice_id", self.invoice_id.as_deref())
    }

    /// Positive requested amount, if any.
    pub fn requested_amount(&self) -> Option<Decimal> {
        self.matched_amount
            .as_ref()
            .map(to_amount)
            .filter(|amount| *amount > Decimal::ZERO)
    }

    pub fn notes(&self) -> Option<String> {
        self.notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }
}

fn parse_id(field: &str, value: Option<&str>) -> Result<Uuid, String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Err(format!("{} is required", field)),
        Some(raw) => Uuid::parse_str(raw).map_err(|_| format!("{} must be a valid UUID", field)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMatchResponse {
    pub success: bool,
    pub match_id: Uuid,
    pub applied_amount: Decimal,
    pub bank_transaction: BankTransaction,
    pub invoice: Invoice,
    pub matches: Vec<MatchDetail>,
    pub total_matched_amount: Decimal,
}

impl From<ManualMatchOutcome> for CreateMatchResponse {
    fn from(outcome: ManualMatchOutcome) -> Self {
        Self {
            success: true,
            match_id: outcome.match_id,
            applied_amount: outcome.applied_amount,
            bank_transaction: outcome.bank_transaction,
            invoice: outcome.invoice,
            matches: outcome.matches,
            total_matched_amount: outcome.total_matched_amount,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionMatchesResponse {
    pub bank_transaction: BankTransaction,
    pub matches: Vec<MatchDetail>,
    pub total_matched_amount: Decimal,
}

impl From<TransactionMatches> for TransactionMatchesResponse {
    fn from(view: TransactionMatches) -> Self {
        Self {
            bank_transaction: view.bank_transaction,
            matches: view.matches,
            total_matched_amount: view.total_matched_amount,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecomputeResponse {
    pub bank_transaction_id: Uuid,
    pub status: String,
    pub matched_invoice_ids: Vec<Uuid>,
    pub total_matched_amount: Decimal,
    pub changed: bool,
}

impl From<TransactionState> for RecomputeResponse {
    fn from(state: TransactionState) -> Self {
        Self {
            bank_transaction_id: state.bank_transaction_id,
            status: state.status.as_str().to_string(),
            matched_invoice_ids: state.matched_invoice_ids,
            total_matched_amount: state.total_matched,
            changed: state.changed,
        }
    }
}
