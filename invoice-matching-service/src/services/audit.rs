//! Best-effort audit recording.
//!
//! Audit entries are observability, not correctness: a failed write is logged
//! and counted, and the reconciliation carries on.

use crate::models::AuditLogEntry;
use crate::services::metrics::record_error;
use crate::services::AuditSink;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub mod actions {
    pub const MATCH_APPROVED: &str = "reconciliation_match.approved";
    pub const MATCH_COMPENSATED: &str = "reconciliation_match.compensated";
    pub const TRANSACTION_SETTLEMENT_UPDATED: &str = "bank_transaction.settlement_updated";
    pub const FEE_EVENTS_PAID: &str = "fee_events.paid";
    pub const SUBSCRIPTION_FUNDING_UPDATED: &str = "subscription.funding_updated";
}

pub mod entities {
    pub const RECONCILIATION_MATCH: &str = "reconciliation_match";
    pub const BANK_TRANSACTION: &str = "bank_transaction";
    pub const INVOICE: &str = "invoice";
    pub const SUBSCRIPTION: &str = "subscription";
}

#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append one entry per logical state change. Never fails the caller.
    pub async fn record(
        &self,
        actor_user_id: &str,
        action: &str,
        entity: &str,
        entity_id: Uuid,
        metadata: Value,
    ) {
        let entry = AuditLogEntry::new(actor_user_id, action, entity, entity_id, metadata);

        match self.sink.append(&entry).await {
            Ok(()) => {
                tracing::debug!(action = %action, entity = %entity, entity_id = %entity_id, "Audit entry recorded");
            }
            Err(e) => {
                record_error("audit_write");
                tracing::warn!(
                    error = %e,
                    action = %action,
                    entity = %entity,
                    entity_id = %entity_id,
                    "Failed to write audit entry"
                );
            }
        }
    }
}
