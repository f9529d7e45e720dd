//! Domain models for invoice-matching-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Currency assumed when a transaction or invoice does not carry one.
pub const DEFAULT_CURRENCY: &str = "USD";

// ============================================================================
// Bank Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankTransactionStatus {
    Unmatched,
    PartiallyMatched,
    Matched,
}

impl BankTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::PartiallyMatched => "partially_matched",
            Self::Matched => "matched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "partially_matched" => Self::PartiallyMatched,
            "matched" => Self::Matched,
            _ => Self::Unmatched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BankTransaction {
    #[serde(rename = "id")]
    pub bank_transaction_id: Uuid,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub status: String,
    pub matched_invoice_ids: Vec<Uuid>,
    pub counterparty: Option<String>,
    pub memo: Option<String>,
    pub value_date: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BankTransaction {
    pub fn currency_or_default(&self) -> &str {
        currency_or_default(self.currency.as_deref())
    }
}

// ============================================================================
// Invoice Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "partially_paid" => Self::PartiallyPaid,
            "paid" => Self::Paid,
            "overdue" => Self::Overdue,
            "cancelled" => Self::Cancelled,
            _ => Self::Draft,
        }
    }
}

/// How much of an invoice is covered by approved allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceMatchStatus {
    Unmatched,
    PartiallyMatched,
    Matched,
}

impl InvoiceMatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::PartiallyMatched => "partially_matched",
            Self::Matched => "matched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "partially_matched" => Self::PartiallyMatched,
            "matched" => Self::Matched,
            _ => Self::Unmatched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    #[serde(rename = "id")]
    pub invoice_id: Uuid,
    pub invoice_number: Option<String>,
    pub investor_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Option<Decimal>,
    pub currency: Option<String>,
    pub status: String,
    pub match_status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn currency_or_default(&self) -> &str {
        currency_or_default(self.currency.as_deref())
    }

    pub fn is_paid(&self) -> bool {
        InvoiceStatus::from_str(&self.status) == InvoiceStatus::Paid
    }
}

// ============================================================================
// Reconciliation Match Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Suggested,
    Approved,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suggested => "suggested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Suggested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Manual,
    Auto,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            _ => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReconciliationMatch {
    #[serde(rename = "id")]
    pub match_id: Uuid,
    pub bank_transaction_id: Uuid,
    pub invoice_id: Uuid,
    pub matched_amount: Decimal,
    pub match_type: String,
    pub match_confidence: i32,
    pub match_reason: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl ReconciliationMatch {
    pub fn is_approved(&self) -> bool {
        MatchStatus::from_str(&self.status) == MatchStatus::Approved
    }
}

/// Input for inserting a match in `suggested` state.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub bank_transaction_id: Uuid,
    pub invoice_id: Uuid,
    pub matched_amount: Decimal,
    pub match_type: MatchType,
    pub match_confidence: i32,
    pub match_reason: String,
    pub notes: Option<String>,
}

/// Approved match with the invoice, investor and deal it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    #[serde(flatten)]
    pub reconciliation_match: ReconciliationMatch,
    pub invoice: Option<InvoiceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    #[serde(rename = "id")]
    pub invoice_id: Uuid,
    pub invoice_number: Option<String>,
    pub total: Decimal,
    pub status: String,
    pub investor: Option<InvestorSummary>,
    pub deal: Option<DealSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvestorSummary {
    #[serde(rename = "id")]
    pub investor_id: Uuid,
    pub legal_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DealSummary {
    #[serde(rename = "id")]
    pub deal_id: Uuid,
    pub name: String,
}

// ============================================================================
// Subscription Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Committed,
    PartiallyFunded,
    Funded,
    Active,
    Cancelled,
    Withdrawn,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::PartiallyFunded => "partially_funded",
            Self::Funded => "funded",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Unknown statuses parse to `None` so they are never treated as fundable.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "committed" => Some(Self::Committed),
            "partially_funded" => Some(Self::PartiallyFunded),
            "funded" => Some(Self::Funded),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    pub fn is_fundable(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Committed | Self::PartiallyFunded | Self::Funded | Self::Active
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    #[serde(rename = "id")]
    pub subscription_id: Uuid,
    pub investor_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub commitment: Decimal,
    pub funded_amount: Decimal,
    pub status: String,
    pub updated_utc: DateTime<Utc>,
}

// ============================================================================
// Fee Event Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeEventStatus {
    Accrued,
    Invoiced,
    Paid,
}

impl FeeEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accrued => "accrued",
            Self::Invoiced => "invoiced",
            Self::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "invoiced" => Self::Invoiced,
            "paid" => Self::Paid,
            _ => Self::Accrued,
        }
    }

    /// Statuses that settle when the owning invoice is paid.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Accrued | Self::Invoiced)
    }
}

/// Only fixed-amount fees feed subscription funding.
pub const FLAT_FEE_TYPE: &str = "flat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FeeEvent {
    #[serde(rename = "id")]
    pub fee_event_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub allocation_id: Option<Uuid>,
    pub fee_type: String,
    pub computed_amount: Decimal,
    pub status: String,
}

impl FeeEvent {
    pub fn is_flat(&self) -> bool {
        self.fee_type == FLAT_FEE_TYPE
    }
}

// ============================================================================
// Audit Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub audit_log_id: Uuid,
    pub actor_user_id: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Uuid,
    pub metadata: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        actor_user_id: impl Into<String>,
        action: impl Into<String>,
        entity: impl Into<String>,
        entity_id: Uuid,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            audit_log_id: Uuid::new_v4(),
            actor_user_id: actor_user_id.into(),
            action: action.into(),
            entity: entity.into(),
            entity_id,
            metadata,
            created_utc: Utc::now(),
        }
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

fn currency_or_default(currency: Option<&str>) -> &str {
    match currency {
        Some(c) if !c.trim().is_empty() => c,
        _ => DEFAULT_CURRENCY,
    }
}
