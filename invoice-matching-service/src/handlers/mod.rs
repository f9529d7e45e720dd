//! HTTP handlers for invoice-matching-service.

pub mod health;
pub mod matches;

pub use health::{health_check, metrics_handler, readiness_check};
