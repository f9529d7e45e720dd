//! Descriptive labelling of an allocation. The label never gates a match.

use super::amount::approx_equal;
use super::proposal::MatchProposal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchClassification {
    /// Settles the invoice and consumes the whole transaction.
    Exact,
    /// Settles the invoice; the transaction has other allocations or a remainder.
    Split,
    /// Consumes the transaction across several invoices; this invoice stays open.
    Combined,
    /// Neither side is fully settled.
    Partial,
}

impl MatchClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Split => "split",
            Self::Combined => "combined",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for MatchClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(proposal: &MatchProposal) -> MatchClassification {
    let covers_invoice = approx_equal(proposal.proposed, proposal.invoice_balance);
    let covers_transaction = approx_equal(
        proposal.proposed + proposal.already_approved,
        proposal.transaction_amount,
    );

    match (covers_invoice, covers_transaction) {
        (true, true) => MatchClassification::Exact,
        (true, false) => MatchClassification::Split,
        (false, true) => MatchClassification::Combined,
        (false, false) => MatchClassification::Partial,
    }
}

/// Text stored in `match_reason`; the label is kept verbatim for reporting.
pub fn match_reason(label: MatchClassification, notes: Option<&str>) -> String {
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("Manual match ({}): {}", label, notes),
        None => format!("Manual match ({})", label),
    }
}
