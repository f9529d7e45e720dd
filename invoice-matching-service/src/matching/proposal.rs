//! Allocation sizing for a manual match.

use super::amount::{is_negligible, round2};
use super::error::MatchError;
use crate::models::{BankTransaction, Invoice, ReconciliationMatch};
use rust_decimal::Decimal;

/// The clamped allocation plus the figures the classifier needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchProposal {
    pub proposed: Decimal,
    pub invoice_balance: Decimal,
    pub remaining_on_transaction: Decimal,
    /// Sum of matches already approved on the transaction before this one.
    pub already_approved: Decimal,
    pub transaction_amount: Decimal,
}

/// Sum of `matched_amount` over approved matches, ignoring anything else.
pub fn approved_total(matches: &[ReconciliationMatch]) -> Decimal {
    matches
        .iter()
        .filter(|m| m.is_approved())
        .map(|m| m.matched_amount)
        .sum()
}

/// Outstanding balance of an invoice: the stored `balance_due` when present,
/// otherwise `max(total - paid_amount, 0)`.
pub fn invoice_balance(invoice: &Invoice) -> Decimal {
    match invoice.balance_due {
        Some(balance) => round2(balance),
        None => round2((invoice.total - invoice.paid_amount).max(Decimal::ZERO)),
    }
}

/// Size the allocation of `transaction` against `invoice`.
///
/// `approved` must be the approved matches on this transaction (any invoice).
/// A positive `requested_amount` can only shrink the allocation.
pub fn build_proposal(
    transaction: &BankTransaction,
    invoice: &Invoice,
    approved: &[ReconciliationMatch],
    requested_amount: Option<Decimal>,
) -> Result<MatchProposal, MatchError> {
    let tx_currency = transaction.currency_or_default();
    let invoice_currency = invoice.currency_or_default();
    if !tx_currency.eq_ignore_ascii_case(invoice_currency) {
        return Err(MatchError::validation(format!(
            "Currency mismatch: bank transaction is {} but invoice is {}",
            tx_currency, invoice_currency
        )));
    }

    let already_approved = approved_total(approved);
    let remaining_on_transaction = round2(transaction.amount - already_approved);
    if is_negligible(remaining_on_transaction) {
        return Err(MatchError::validation(
            "Bank transaction has no remaining funds to allocate",
        ));
    }

    let invoice_balance = invoice_balance(invoice);
    if is_negligible(invoice_balance) {
        return Err(MatchError::validation("Invoice is already fully paid"));
    }

    let mut proposed = invoice_balance.min(remaining_on_transaction);
    if let Some(requested) = requested_amount.filter(|r| *r > Decimal::ZERO) {
        proposed = proposed.min(requested);
    }

    let proposed = round2(proposed);
    if proposed <= Decimal::ZERO || is_negligible(proposed) {
        return Err(MatchError::validation(
            "Matched amount must be greater than zero",
        ));
    }

    Ok(MatchProposal {
        proposed,
        invoice_balance,
        remaining_on_transaction,
        already_approved,
        transaction_amount: transaction.amount,
    })
}
