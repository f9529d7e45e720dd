//! Common test utilities for invoice-matching-service integration tests.

#![allow(dead_code)]

use chrono::Utc;
use invoice_matching_service::matching::{ManualMatchRequest, MatchingEngine};
use invoice_matching_service::models::{
    BankTransaction, DealSummary, FeeEvent, InvestorSummary, Invoice, MatchStatus,
    ReconciliationMatch, Subscription,
};
use invoice_matching_service::config::DatabaseConfig;
use invoice_matching_service::services::{ApplyMatch, InMemoryLedgerStore, PgLedgerStore};
use invoice_matching_service::{build_router, AppState};
use axum::Router;
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

pub const ACTOR: &str = "staff-42";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,invoice_matching_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Engine wired to a fresh in-memory store that also plays the apply
/// operation and the audit sink.
pub struct TestApp {
    pub store: Arc<InMemoryLedgerStore>,
    pub engine: MatchingEngine,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(AppState::new(self.engine.clone()))
    }

    pub async fn seed_transaction(&self, amount: Decimal) -> BankTransaction {
        let transaction = BankTransaction {
            bank_transaction_id: Uuid::new_v4(),
            amount,
            currency: Some("USD".to_string()),
            status: "unmatched".to_string(),
            matched_invoice_ids: vec![],
            counterparty: Some("Northwind LP".to_string()),
            memo: Some("Capital call remittance".to_string()),
            value_date: Some(Utc::now().date_naive()),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };
        self.store.insert_bank_transaction(transaction.clone()).await;
        transaction
    }

    pub async fn seed_invoice(&self, total: Decimal, paid_amount: Decimal) -> Invoice {
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: Some(format!("INV-{}", &Uuid::new_v4().simple().to_string()[..6])),
            investor_id: None,
            deal_id: None,
            total,
            paid_amount,
            balance_due: None,
            currency: None,
            status: "sent".to_string(),
            match_status: "unmatched".to_string(),
            paid_at: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };
        self.store.insert_invoice(invoice.clone()).await;
        invoice
    }

    /// Invoice with investor and deal projections attached.
    pub async fn seed_investor_invoice(&self, total: Decimal) -> Invoice {
        let investor = InvestorSummary {
            investor_id: Uuid::new_v4(),
            legal_name: "Harbor Family Office".to_string(),
        };
        let deal = DealSummary {
            deal_id: Uuid::new_v4(),
            name: "Fund III Series A".to_string(),
        };
        self.store.insert_investor(investor.clone()).await;
        self.store.insert_deal(deal.clone()).await;

        let mut invoice = self.seed_invoice(total, Decimal::ZERO).await;
        invoice.investor_id = Some(investor.investor_id);
        invoice.deal_id = Some(deal.deal_id);
        self.store.insert_invoice(invoice.clone()).await;
        invoice
    }

    pub async fn seed_approved_match(
        &self,
        transaction: &BankTransaction,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> ReconciliationMatch {
        let approved = ReconciliationMatch {
            match_id: Uuid::new_v4(),
            bank_transaction_id: transaction.bank_transaction_id,
            invoice_id,
            matched_amount: amount,
            match_type: "manual".to_string(),
            match_confidence: 100,
            match_reason: Some("Manual match (partial)".to_string()),
            status: MatchStatus::Approved.as_str().to_string(),
            notes: None,
            approved_at: Some(Utc::now()),
            approved_by: Some("staff-1".to_string()),
            created_utc: Utc::now(),
        };
        self.store.insert_match(approved.clone()).await;
        approved
    }

    /// Unapplied auto-match suggestion, as left by a matching run.
    pub async fn seed_auto_suggestion(
        &self,
        transaction: &BankTransaction,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> ReconciliationMatch {
        let suggestion = ReconciliationMatch {
            match_id: Uuid::new_v4(),
            bank_transaction_id: transaction.bank_transaction_id,
            invoice_id,
            matched_amount: amount,
            match_type: "auto".to_string(),
            match_confidence: 85,
            match_reason: Some("Amount and reference match".to_string()),
            status: MatchStatus::Suggested.as_str().to_string(),
            notes: None,
            approved_at: None,
            approved_by: None,
            created_utc: Utc::now(),
        };
        self.store.insert_match(suggestion.clone()).await;
        suggestion
    }

    pub async fn seed_subscription(
        &self,
        commitment: Decimal,
        funded_amount: Decimal,
        status: &str,
    ) -> Subscription {
        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            investor_id: None,
            vehicle_id: None,
            commitment,
            funded_amount,
            status: status.to_string(),
            updated_utc: Utc::now(),
        };
        self.store.insert_subscription(subscription.clone()).await;
        subscription
    }

    pub async fn seed_fee_event(
        &self,
        invoice_id: Uuid,
        subscription_id: Uuid,
        fee_type: &str,
        amount: Decimal,
        status: &str,
    ) -> FeeEvent {
        let event = FeeEvent {
            fee_event_id: Uuid::new_v4(),
            invoice_id: Some(invoice_id),
            allocation_id: Some(subscription_id),
            fee_type: fee_type.to_string(),
            computed_amount: amount,
            status: status.to_string(),
        };
        self.store.insert_fee_event(event.clone()).await;
        event
    }
}

pub fn spawn_app() -> TestApp {
    init_tracing();

    let store = Arc::new(InMemoryLedgerStore::new());
    let engine = MatchingEngine::new(store.clone(), store.clone(), store.clone());

    TestApp { store, engine }
}

pub fn request(transaction: &BankTransaction, invoice: &Invoice) -> ManualMatchRequest {
    ManualMatchRequest {
        bank_transaction_id: transaction.bank_transaction_id,
        invoice_id: invoice.invoice_id,
        requested_amount: None,
        notes: None,
    }
}

/// Postgres test configuration, or `None` when `TEST_DATABASE_URL` is unset.
fn test_database_config() -> Option<DatabaseConfig> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    Some(DatabaseConfig {
        url,
        max_connections: 4,
        min_connections: 1,
    })
}

/// Engine wired to [`PgLedgerStore`]. Rows are keyed by fresh UUIDs, so tests
/// share one database without cleanup.
pub struct PgTestApp {
    pub store: Arc<PgLedgerStore>,
    pub engine: MatchingEngine,
}

impl PgTestApp {
    pub fn router(&self) -> Router {
        build_router(AppState::new(self.engine.clone()))
    }

    /// Same store and audit sink, different apply operation.
    pub fn engine_with_applier(&self, applier: Arc<dyn ApplyMatch>) -> MatchingEngine {
        MatchingEngine::new(self.store.clone(), applier, self.store.clone())
    }

    pub async fn seed_transaction(&self, amount: Decimal) -> BankTransaction {
        sqlx::query_as::<_, BankTransaction>(
            r#"
            INSERT INTO bank_transactions (bank_transaction_id, amount, currency, counterparty, memo, value_date)
            VALUES ($1, $2, 'USD', 'Northwind LP', 'Capital call remittance', CURRENT_DATE)
            RETURNING bank_transaction_id, amount, currency, status, matched_invoice_ids,
                      counterparty, memo, value_date, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(amount)
        .fetch_one(self.store.pool())
        .await
        .expect("Failed to seed bank transaction")
    }

    pub async fn seed_invoice(
        &self,
        total: Decimal,
        paid_amount: Decimal,
        balance_due: Option<Decimal>,
    ) -> Invoice {
        sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, invoice_number, total, paid_amount, balance_due)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING invoice_id, invoice_number, investor_id, deal_id, total, paid_amount,
                      balance_due, currency, status, match_status, paid_at, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(format!("INV-{}", &Uuid::new_v4().simple().to_string()[..6]))
        .bind(total)
        .bind(paid_amount)
        .bind(balance_due)
        .fetch_one(self.store.pool())
        .await
        .expect("Failed to seed invoice")
    }

    /// Manual allocation another request has reserved but not yet applied.
    pub async fn seed_pending_manual_match(
        &self,
        transaction: &BankTransaction,
        invoice_id: Uuid,
        amount: Decimal,
    ) {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_matches
                (match_id, bank_transaction_id, invoice_id, matched_amount, match_type,
                 match_confidence, match_reason, status)
            VALUES ($1, $2, $3, $4, 'manual', 100, 'Manual match (partial)', 'suggested')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(transaction.bank_transaction_id)
        .bind(invoice_id)
        .bind(amount)
        .execute(self.store.pool())
        .await
        .expect("Failed to seed pending match");
    }

    pub async fn seed_subscription(
        &self,
        commitment: Decimal,
        funded_amount: Decimal,
        status: &str,
    ) -> Uuid {
        let subscription_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO subscriptions (subscription_id, commitment, funded_amount, status) VALUES ($1, $2, $3, $4)",
        )
        .bind(subscription_id)
        .bind(commitment)
        .bind(funded_amount)
        .bind(status)
        .execute(self.store.pool())
        .await
        .expect("Failed to seed subscription");
        subscription_id
    }

    pub async fn seed_fee_event(
        &self,
        invoice_id: Uuid,
        subscription_id: Uuid,
        fee_type: &str,
        amount: Decimal,
        status: &str,
    ) {
        sqlx::query(
            r#"
            INSERT INTO fee_events (fee_event_id, invoice_id, allocation_id, fee_type, computed_amount, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(subscription_id)
        .bind(fee_type)
        .bind(amount)
        .bind(status)
        .execute(self.store.pool())
        .await
        .expect("Failed to seed fee event");
    }

    /// Every match row on the transaction, whatever its status.
    pub async fn matches_for(&self, transaction: &BankTransaction) -> Vec<ReconciliationMatch> {
        sqlx::query_as::<_, ReconciliationMatch>(
            r#"
            SELECT match_id, bank_transaction_id, invoice_id, matched_amount, match_type,
                   match_confidence, match_reason, status, notes, approved_at, approved_by, created_utc
            FROM reconciliation_matches
            WHERE bank_transaction_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(transaction.bank_transaction_id)
        .fetch_all(self.store.pool())
        .await
        .expect("Failed to list matches")
    }

    pub async fn audit_actions(&self, entity_id: Uuid) -> Vec<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT action FROM audit_logs WHERE entity_id = $1 ORDER BY created_utc",
        )
        .bind(entity_id)
        .fetch_all(self.store.pool())
        .await
        .expect("Failed to list audit entries")
    }
}

/// Connect to `TEST_DATABASE_URL` and run migrations. Returns `None` when the
/// variable is unset so the suite still runs without a database.
pub async fn spawn_pg_app() -> Option<PgTestApp> {
    init_tracing();

    let Some(config) = test_database_config() else {
        tracing::warn!("TEST_DATABASE_URL not set; skipping Postgres-backed test");
        return None;
    };

    let store = PgLedgerStore::new(&config.url, config.max_connections, config.min_connections)
        .await
        .expect("Failed to connect to TEST_DATABASE_URL");
    store
        .run_migrations()
        .await
        .expect("Failed to run migrations");

    let store = Arc::new(store);
    let engine = MatchingEngine::new(store.clone(), store.clone(), store.clone());
    Some(PgTestApp { store, engine })
}
