//! Postgres-backed ledger store for invoice-matching-service.

use crate::matching::amount::{round2, AMOUNT_EPSILON};
use crate::matching::settlement::book_payment;
use crate::models::{
    AuditLogEntry, BankTransaction, BankTransactionStatus, DealSummary, FeeEvent, InvestorSummary,
    Invoice, InvoiceSummary, MatchDetail, MatchStatus, MatchType, NewMatch, ReconciliationMatch,
    Subscription, SubscriptionStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::{ApplyMatch, AuditSink, LedgerStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const BANK_TRANSACTION_COLUMNS: &str = "bank_transaction_id, amount, currency, status, matched_invoice_ids, counterparty, memo, value_date, created_utc, updated_utc";
const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, investor_id, deal_id, total, paid_amount, balance_due, currency, status, match_status, paid_at, created_utc, updated_utc";
const MATCH_COLUMNS: &str = "match_id, bank_transaction_id, invoice_id, matched_amount, match_type, match_confidence, match_reason, status, notes, approved_at, approved_by, created_utc";
const SUBSCRIPTION_COLUMNS: &str =
    "subscription_id, investor_id, vehicle_id, commitment, funded_amount, status, updated_utc";

/// Flat row of the match detail join.
#[derive(Debug, FromRow)]
struct MatchDetailRow {
    match_id: Uuid,
    bank_transaction_id: Uuid,
    invoice_id: Uuid,
    matched_amount: Decimal,
    match_type: String,
    match_confidence: i32,
    match_reason: Option<String>,
    status: String,
    notes: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<String>,
    created_utc: DateTime<Utc>,
    invoice_number: Option<String>,
    invoice_total: Option<Decimal>,
    invoice_status: Option<String>,
    investor_id: Option<Uuid>,
    investor_legal_name: Option<String>,
    deal_id: Option<Uuid>,
    deal_name: Option<String>,
}

impl From<MatchDetailRow> for MatchDetail {
    fn from(row: MatchDetailRow) -> Self {
        let investor = match (row.investor_id, row.investor_legal_name) {
            (Some(investor_id), Some(legal_name)) => Some(InvestorSummary {
                investor_id,
                legal_name,
            }),
            _ => None,
        };
        let deal = match (row.deal_id, row.deal_name) {
            (Some(deal_id), Some(name)) => Some(DealSummary { deal_id, name }),
            _ => None,
        };
        let invoice = match (row.invoice_total, row.invoice_status) {
            (Some(total), Some(status)) => Some(InvoiceSummary {
                invoice_id: row.invoice_id,
                invoice_number: row.invoice_number,
                total,
                status,
                investor,
                deal,
            }),
            _ => None,
        };

        MatchDetail {
            reconciliation_match: ReconciliationMatch {
                match_id: row.match_id,
                bank_transaction_id: row.bank_transaction_id,
                invoice_id: row.invoice_id,
                matched_amount: row.matched_amount,
                match_type: row.match_type,
                match_confidence: row.match_confidence,
                match_reason: row.match_reason,
                status: row.status,
                notes: row.notes,
                approved_at: row.approved_at,
                approved_by: row.approved_by,
                created_utc: row.created_utc,
            },
            invoice,
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoice-matching-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn approved_matches_where(
        &self,
        column: &str,
        id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError> {
        let sql = format!(
            "SELECT {} FROM reconciliation_matches WHERE {} = $1 AND status = $2 ORDER BY created_utc",
            MATCH_COLUMNS, column
        );
        let matches = sqlx::query_as::<_, ReconciliationMatch>(&sql)
            .bind(id)
            .bind(MatchStatus::Approved.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(matches)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(bank_transaction_id = %id))]
    async fn get_bank_transaction(&self, id: Uuid) -> Result<Option<BankTransaction>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bank_transaction"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM bank_transactions WHERE bank_transaction_id = $1",
            BANK_TRANSACTION_COLUMNS
        );
        let transaction = sqlx::query_as::<_, BankTransaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(transaction)
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let sql = format!("SELECT {} FROM invoices WHERE invoice_id = $1", INVOICE_COLUMNS);
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn list_approved_matches(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_approved_matches"])
            .start_timer();

        let matches = self
            .approved_matches_where("bank_transaction_id", bank_transaction_id)
            .await?;

        timer.observe_duration();
        Ok(matches)
    }

    #[instrument(skip(self))]
    async fn list_approved_matches_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<ReconciliationMatch>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_approved_matches_for_invoice"])
            .start_timer();

        let matches = self.approved_matches_where("invoice_id", invoice_id).await?;

        timer.observe_duration();
        Ok(matches)
    }

    #[instrument(skip(self))]
    async fn list_match_details(
        &self,
        bank_transaction_id: Uuid,
    ) -> Result<Vec<MatchDetail>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_match_details"])
            .start_timer();

        let rows = sqlx::query_as::<_, MatchDetailRow>(
            r#"
            SELECT m.match_id, m.bank_transaction_id, m.invoice_id, m.matched_amount, m.match_type,
                   m.match_confidence, m.match_reason, m.status, m.notes, m.approved_at,
                   m.approved_by, m.created_utc,
                   i.invoice_number, i.total AS invoice_total, i.status AS invoice_status,
                   inv.investor_id, inv.legal_name AS investor_legal_name,
                   d.deal_id, d.name AS deal_name
            FROM reconciliation_matches m
            LEFT JOIN invoices i ON i.invoice_id = m.invoice_id
            LEFT JOIN investors inv ON inv.investor_id = i.investor_id
            LEFT JOIN deals d ON d.deal_id = i.deal_id
            WHERE m.bank_transaction_id = $1 AND m.status = $2
            ORDER BY m.created_utc
            "#,
        )
        .bind(bank_transaction_id)
        .bind(MatchStatus::Approved.as_str())
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows.into_iter().map(MatchDetail::from).collect())
    }

    #[instrument(skip(self, new_match), fields(
        bank_transaction_id = %new_match.bank_transaction_id,
        invoice_id = %new_match.invoice_id,
        amount = %new_match.matched_amount,
    ))]
    async fn insert_suggested_match(
        &self,
        new_match: &NewMatch,
    ) -> Result<ReconciliationMatch, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_suggested_match"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        // Serialises concurrent reservations against the same transaction.
        let amount = sqlx::query_scalar::<_, Decimal>(
            "SELECT amount FROM bank_transactions WHERE bank_transaction_id = $1 FOR UPDATE",
        )
        .bind(new_match.bank_transaction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!(
                "bank transaction {}",
                new_match.bank_transaction_id
            ))
        })?;

        let reserved = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(matched_amount), 0)
            FROM reconciliation_matches
            WHERE bank_transaction_id = $1
              AND (status = $2 OR (status = $3 AND match_type = $4))
            "#,
        )
        .bind(new_match.bank_transaction_id)
        .bind(MatchStatus::Approved.as_str())
        .bind(MatchStatus::Suggested.as_str())
        .bind(MatchType::Manual.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if round2(reserved + new_match.matched_amount) > amount + AMOUNT_EPSILON {
            tx.rollback().await.ok();
            return Err(StoreError::Conflict(format!(
                "reserving {} would exceed transaction amount {} ({} already reserved)",
                new_match.matched_amount, amount, reserved
            )));
        }

        let sql = format!(
            r#"
            INSERT INTO reconciliation_matches
                (match_id, bank_transaction_id, invoice_id, matched_amount, match_type,
                 match_confidence, match_reason, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            MATCH_COLUMNS
        );
        let inserted = sqlx::query_as::<_, ReconciliationMatch>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_match.bank_transaction_id)
            .bind(new_match.invoice_id)
            .bind(new_match.matched_amount)
            .bind(new_match.match_type.as_str())
            .bind(new_match.match_confidence)
            .bind(&new_match.match_reason)
            .bind(MatchStatus::Suggested.as_str())
            .bind(&new_match.notes)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        timer.observe_duration();
        info!(match_id = %inserted.match_id, "Suggested match reserved");

        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn delete_match(&self, match_id: Uuid) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_match"])
            .start_timer();

        let result = sqlx::query("DELETE FROM reconciliation_matches WHERE match_id = $1")
            .bind(match_id)
            .execute(&self.pool)
            .await?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("match {}", match_id)));
        }
        Ok(())
    }

    #[instrument(skip(self, matched_invoice_ids), fields(status = %status.as_str()))]
    async fn update_bank_transaction_state(
        &self,
        bank_transaction_id: Uuid,
        status: BankTransactionStatus,
        matched_invoice_ids: &[Uuid],
    ) -> Result<BankTransaction, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_bank_transaction_state"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE bank_transactions
            SET status = $2, matched_invoice_ids = $3, updated_utc = NOW()
            WHERE bank_transaction_id = $1
            RETURNING {}
            "#,
            BANK_TRANSACTION_COLUMNS
        );
        let transaction = sqlx::query_as::<_, BankTransaction>(&sql)
            .bind(bank_transaction_id)
            .bind(status.as_str())
            .bind(matched_invoice_ids)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("bank transaction {}", bank_transaction_id))
            })?;

        timer.observe_duration();
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn delete_stale_suggestions(
        &self,
        bank_transaction_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<u64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_stale_suggestions"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM reconciliation_matches
            WHERE bank_transaction_id = $1 AND invoice_id = $2
              AND status = $3 AND match_type <> $4
            "#,
        )
        .bind(bank_transaction_id)
        .bind(invoice_id)
        .bind(MatchStatus::Suggested.as_str())
        .bind(MatchType::Manual.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn settle_fee_events(&self, invoice_id: Uuid) -> Result<Vec<FeeEvent>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle_fee_events"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let outstanding = sqlx::query_as::<_, FeeEvent>(
            r#"
            SELECT fee_event_id, invoice_id, allocation_id, fee_type, computed_amount, status
            FROM fee_events
            WHERE invoice_id = $1 AND status IN ('accrued', 'invoiced')
            ORDER BY fee_event_id
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await?;

        if !outstanding.is_empty() {
            let ids: Vec<Uuid> = outstanding.iter().map(|e| e.fee_event_id).collect();
            sqlx::query(
                "UPDATE fee_events SET status = 'paid', updated_utc = NOW() WHERE fee_event_id = ANY($1)",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        timer.observe_duration();
        Ok(outstanding)
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self), fields(status = %status.as_str()))]
    async fn update_subscription_funding(
        &self,
        subscription_id: Uuid,
        funded_amount: Decimal,
        status: SubscriptionStatus,
    ) -> Result<Subscription, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription_funding"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE subscriptions
            SET funded_amount = $2, status = $3, updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .bind(funded_amount)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", subscription_id)))?;

        timer.observe_duration();
        Ok(subscription)
    }
}

#[async_trait]
impl ApplyMatch for PgLedgerStore {
    /// Approve the match and book it against the invoice in one transaction.
    #[instrument(skip(self))]
    async fn apply_match(&self, match_id: Uuid, approved_by: &str) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_match"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM reconciliation_matches WHERE match_id = $1 FOR UPDATE",
            MATCH_COLUMNS
        );
        let pending = sqlx::query_as::<_, ReconciliationMatch>(&sql)
            .bind(match_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("match {}", match_id)))?;

        if MatchStatus::from_str(&pending.status) != MatchStatus::Suggested {
            tx.rollback().await.ok();
            return Err(StoreError::Conflict(format!(
                "match {} is {}, not suggested",
                match_id, pending.status
            )));
        }

        sqlx::query(
            "UPDATE reconciliation_matches SET status = $2, approved_at = NOW(), approved_by = $3 WHERE match_id = $1",
        )
        .bind(match_id)
        .bind(MatchStatus::Approved.as_str())
        .bind(approved_by)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(pending.invoice_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", pending.invoice_id)))?;

        let sql = format!(
            "SELECT {} FROM reconciliation_matches WHERE invoice_id = $1 AND status = $2",
            MATCH_COLUMNS
        );
        let approved_for_invoice = sqlx::query_as::<_, ReconciliationMatch>(&sql)
            .bind(pending.invoice_id)
            .bind(MatchStatus::Approved.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let payment = book_payment(&invoice, pending.matched_amount, &approved_for_invoice);

        sqlx::query(
            r#"
            UPDATE invoices
            SET paid_amount = $2,
                balance_due = $3,
                status = $4,
                match_status = $5,
                paid_at = CASE WHEN $6 THEN NOW() ELSE paid_at END,
                updated_utc = NOW()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(payment.paid_amount)
        .bind(payment.balance_due)
        .bind(payment.status.as_str())
        .bind(payment.match_status.as_str())
        .bind(payment.settled)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        timer.observe_duration();
        info!(
            invoice_id = %invoice.invoice_id,
            paid_amount = %payment.paid_amount,
            balance_due = %payment.balance_due,
            invoice_status = %payment.status.as_str(),
            "Match approved and booked"
        );

        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgLedgerStore {
    #[instrument(skip(self, entry), fields(action = %entry.action, entity_id = %entry.entity_id))]
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_audit_log"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (audit_log_id, actor_user_id, action, entity, entity_id, metadata, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.audit_log_id)
        .bind(&entry.actor_user_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.metadata)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }
}
