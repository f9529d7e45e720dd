//! Prometheus metrics for invoice-matching-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for manual match requests by outcome.
pub static MATCH_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_match_requests_total",
        "Total number of manual match requests",
        &["outcome"]
    )
    .expect("Failed to register MATCH_REQUESTS")
});

/// Counter for applied matches by classification label.
pub static MATCH_CLASSIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_match_classifications_total",
        "Applied matches by classification",
        &["label"]
    )
    .expect("Failed to register MATCH_CLASSIFICATIONS")
});

/// Counter for compensating deletes after a failed apply.
pub static COMPENSATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_compensations_total",
        "Compensating match deletions after apply failure",
        &["status"]
    )
    .expect("Failed to register COMPENSATIONS")
});

/// Counter for subscriptions visited by the funding cascade.
pub static CASCADE_SUBSCRIPTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_cascade_subscriptions_total",
        "Subscriptions processed by the funding cascade",
        &["outcome"]
    )
    .expect("Failed to register CASCADE_SUBSCRIPTIONS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "matching_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&MATCH_REQUESTS);
    Lazy::force(&MATCH_CLASSIFICATIONS);
    Lazy::force(&COMPENSATIONS);
    Lazy::force(&CASCADE_SUBSCRIPTIONS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_match_request(outcome: &str) {
    MATCH_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_match_classification(label: &str) {
    MATCH_CLASSIFICATIONS.with_label_values(&[label]).inc();
}

pub fn record_compensation(status: &str) {
    COMPENSATIONS.with_label_values(&[status]).inc();
}

pub fn record_cascade_subscription(outcome: &str) {
    CASCADE_SUBSCRIPTIONS.with_label_values(&[outcome]).inc();
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
