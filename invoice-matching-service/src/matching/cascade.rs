//! Funding cascade: once an invoice is paid, its flat fee events feed the
//! funded amount and lifecycle status of the subscriptions they belong to.

use super::amount::{round2, FUNDED_RATIO_THRESHOLD};
use super::error::MatchError;
use crate::models::{FeeEvent, Invoice, SubscriptionStatus};
use crate::services::audit::{actions, entities, AuditRecorder};
use crate::services::metrics::record_cascade_subscription;
use crate::services::LedgerStore;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::instrument;
use uuid::Uuid;

/// One subscription's funding change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundingUpdate {
    pub subscription_id: Uuid,
    pub attributed_amount: Decimal,
    pub previous_funded_amount: Decimal,
    pub new_funded_amount: Decimal,
    pub previous_status: String,
    pub new_status: SubscriptionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CascadeOutcome {
    pub settled_fee_events: Vec<Uuid>,
    pub updates: Vec<FundingUpdate>,
    pub skipped_subscriptions: Vec<Uuid>,
}

/// Sum flat fee amounts per target subscription. Non-flat events and events
/// without an allocation are ignored.
pub fn group_flat_fees(events: &[FeeEvent]) -> BTreeMap<Uuid, Decimal> {
    let mut grouped = BTreeMap::new();
    for event in events.iter().filter(|e| e.is_flat()) {
        if let Some(allocation_id) = event.allocation_id {
            *grouped.entry(allocation_id).or_insert(Decimal::ZERO) += event.computed_amount;
        }
    }
    grouped
}

/// Status a subscription moves to once `new_funded` has been received.
/// Without a positive commitment there is no ratio and the status stays.
pub fn next_subscription_status(
    commitment: Decimal,
    new_funded: Decimal,
    current: SubscriptionStatus,
) -> SubscriptionStatus {
    if commitment <= Decimal::ZERO {
        return current;
    }

    let ratio = new_funded / commitment * Decimal::ONE_HUNDRED;
    if ratio >= FUNDED_RATIO_THRESHOLD {
        SubscriptionStatus::Funded
    } else if ratio > Decimal::ZERO {
        SubscriptionStatus::PartiallyFunded
    } else {
        current
    }
}

/// Settle the invoice's fee events and push flat fees into subscription
/// funding. Only call for an invoice whose reloaded status is paid.
///
/// Non-fundable or missing subscriptions are skipped with a warning. A failed
/// subscription write aborts the cascade: the match is already applied, so
/// the caller must surface the inconsistency.
#[instrument(skip(store, audit, invoice), fields(invoice_id = %invoice.invoice_id, match_id = %match_id))]
pub async fn run_funding_cascade(
    store: &dyn LedgerStore,
    audit: &AuditRecorder,
    invoice: &Invoice,
    match_id: Uuid,
    actor_user_id: &str,
) -> Result<CascadeOutcome, MatchError> {
    let invoice_id = invoice.invoice_id;
    let settled = store
        .settle_fee_events(invoice_id)
        .await
        .map_err(|source| MatchError::FeeSettlementFailed {
            match_id,
            invoice_id,
            source,
        })?;

    let mut outcome = CascadeOutcome {
        settled_fee_events: settled.iter().map(|e| e.fee_event_id).collect(),
        ..Default::default()
    };

    if !settled.is_empty() {
        tracing::info!(count = settled.len(), "Fee events marked paid");
        audit
            .record(
                actor_user_id,
                actions::FEE_EVENTS_PAID,
                entities::INVOICE,
                invoice_id,
                json!({
                    "match_id": match_id,
                    "fee_event_ids": outcome.settled_fee_events,
                    "previous_statuses": settled.iter().map(|e| e.status.as_str()).collect::<Vec<_>>(),
                }),
            )
            .await;
    }

    for (subscription_id, attributed) in group_flat_fees(&settled) {
        let subscription = store
            .get_subscription(subscription_id)
            .await
            .map_err(|source| MatchError::CascadeFailed {
                match_id,
                subscription_id,
                source,
            })?;

        let Some(subscription) = subscription else {
            tracing::warn!(subscription_id = %subscription_id, "Subscription not found, skipping funding update");
            record_cascade_subscription("missing");
            outcome.skipped_subscriptions.push(subscription_id);
            continue;
        };

        let current = match SubscriptionStatus::parse(&subscription.status) {
            Some(status) if status.is_fundable() => status,
            _ => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    status = %subscription.status,
                    "Subscription not in a fundable status, skipping funding update"
                );
                record_cascade_subscription("skipped");
                outcome.skipped_subscriptions.push(subscription_id);
                continue;
            }
        };

        let new_funded = round2(subscription.funded_amount + attributed);
        let new_status = next_subscription_status(subscription.commitment, new_funded, current);

        store
            .update_subscription_funding(subscription_id, new_funded, new_status)
            .await
            .map_err(|source| {
                record_cascade_subscription("failed");
                tracing::error!(
                    error = %source,
                    subscription_id = %subscription_id,
                    match_id = %match_id,
                    new_funded_amount = %new_funded,
                    "Subscription funding update failed after match was applied"
                );
                MatchError::CascadeFailed {
                    match_id,
                    subscription_id,
                    source,
                }
            })?;

        record_cascade_subscription("updated");
        tracing::info!(
            subscription_id = %subscription_id,
            previous_funded_amount = %subscription.funded_amount,
            new_funded_amount = %new_funded,
            new_status = %new_status.as_str(),
            "Subscription funding updated"
        );

        audit
            .record(
                actor_user_id,
                actions::SUBSCRIPTION_FUNDING_UPDATED,
                entities::SUBSCRIPTION,
                subscription_id,
                json!({
                    "match_id": match_id,
                    "invoice_id": invoice_id,
                    "payment_amount": attributed,
                    "previous": {
                        "funded_amount": subscription.funded_amount,
                        "status": subscription.status,
                    },
                    "new": {
                        "funded_amount": new_funded,
                        "status": new_status.as_str(),
                    },
                }),
            )
            .await;

        outcome.updates.push(FundingUpdate {
            subscription_id,
            attributed_amount: attributed,
            previous_funded_amount: subscription.funded_amount,
            new_funded_amount: new_funded,
            previous_status: subscription.status,
            new_status,
        });
    }

    Ok(outcome)
}
