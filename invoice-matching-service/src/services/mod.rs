//! Services for invoice-matching-service.

pub mod audit;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use audit::AuditRecorder;
pub use database::PgLedgerStore;
pub use memory::InMemoryLedgerStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{ApplyMatch, AuditSink, LedgerStore, StoreError};
