//! Invoice-side settlement figures derived from fresh match data.

use super::amount::{approx_equal, is_negligible, round2, AMOUNT_EPSILON};
use super::proposal::approved_total;
use crate::models::{Invoice, InvoiceMatchStatus, InvoiceStatus, ReconciliationMatch};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceSettlement {
    pub matched_total: Decimal,
    pub balance_due: Decimal,
    pub match_status: InvoiceMatchStatus,
}

/// `max(total - paid_amount, 0)`, rounded to cents.
pub fn derived_balance_due(invoice: &Invoice) -> Decimal {
    round2((invoice.total - invoice.paid_amount).max(Decimal::ZERO))
}

/// Match status implied by the approved allocations against the invoice total.
pub fn derive_match_status(matched_total: Decimal, total: Decimal) -> InvoiceMatchStatus {
    if is_negligible(matched_total) {
        InvoiceMatchStatus::Unmatched
    } else if approx_equal(matched_total, total) || matched_total > total {
        InvoiceMatchStatus::Matched
    } else {
        InvoiceMatchStatus::PartiallyMatched
    }
}

/// Settlement figures for an invoice given every approved match against it.
pub fn derive_invoice_settlement(
    invoice: &Invoice,
    approved_for_invoice: &[ReconciliationMatch],
) -> InvoiceSettlement {
    let matched_total = round2(approved_total(approved_for_invoice));
    InvoiceSettlement {
        matched_total,
        balance_due: derived_balance_due(invoice),
        match_status: derive_match_status(matched_total, invoice.total),
    }
}

/// True when a stored `balance_due` agrees with the one derived from
/// `total - paid_amount`. Invoices without a stored balance are consistent.
pub fn balance_is_consistent(invoice: &Invoice) -> bool {
    invoice
        .balance_due
        .map(|stored| approx_equal(stored, derived_balance_due(invoice)))
        .unwrap_or(true)
}

/// An invoice may only be marked paid once allocations reach its total, or
/// once a stored `balance_due` target has been paid down to zero.
pub fn may_be_marked_paid(invoice: &Invoice, approved_for_invoice: &[ReconciliationMatch]) -> bool {
    let matched_total = round2(approved_total(approved_for_invoice));
    matched_total >= invoice.total - AMOUNT_EPSILON
        || invoice.balance_due.is_some_and(is_negligible)
}

/// Invoice fields after one more approved allocation has been booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoicePayment {
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub status: InvoiceStatus,
    pub match_status: InvoiceMatchStatus,
    /// Balance reached zero with this payment; `paid_at` should be stamped.
    pub settled: bool,
}

/// Book `matched_amount` against the invoice. `approved_for_invoice` must
/// already include the match being booked.
///
/// A stored `balance_due` is the target being paid down; only invoices
/// without one fall back to `total - paid_amount`.
pub fn book_payment(
    invoice: &Invoice,
    matched_amount: Decimal,
    approved_for_invoice: &[ReconciliationMatch],
) -> InvoicePayment {
    let paid_amount = round2(invoice.paid_amount + matched_amount);
    let outstanding = match invoice.balance_due {
        Some(stored) => stored - matched_amount,
        None => invoice.total - paid_amount,
    };
    let balance_due = round2(outstanding.max(Decimal::ZERO));
    let settled = is_negligible(balance_due);

    let current = InvoiceStatus::from_str(&invoice.status);
    let status = if settled {
        InvoiceStatus::Paid
    } else {
        match current {
            InvoiceStatus::Overdue | InvoiceStatus::Cancelled => current,
            _ => InvoiceStatus::PartiallyPaid,
        }
    };

    let matched_total = round2(approved_total(approved_for_invoice));
    InvoicePayment {
        paid_amount,
        balance_due,
        status,
        match_status: derive_match_status(matched_total, invoice.total),
        settled,
    }
}
