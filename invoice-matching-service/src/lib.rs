//! Invoice Matching Service - manual bank transaction to invoice reconciliation
//! with settlement recompute and subscription funding cascade.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod matching;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{build_router, AppState};
