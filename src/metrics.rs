//! Prometheus Metrics Module
//!
//! Pre-registered counters for the order-adapter observability signals.
//! All metrics are labelled by service so several adapter deployments can
//! share one scrape target.

use lazy_static::lazy_static;
use prometheus::{opts, register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Orders successfully created at the partner
    pub static ref ORDERS_CREATED: IntCounterVec = register_int_counter_vec!(
        opts!("orders_created_counter", "How many orders were created"),
        &["service"]
    ).expect("FATAL: Failed to register ORDERS_CREATED metric - check for duplicate registration");

    /// Errors raised while creating an order
    pub static ref ORDER_CREATION_ERRORS: IntCounterVec = register_int_counter_vec!(
        opts!("orders_creating_errors_counter", "How many errors raised while creating order"),
        &["service"]
    ).expect("FATAL: Failed to register ORDER_CREATION_ERRORS metric - check for duplicate registration");

    /// Observed order status transitions
    pub static ref ORDER_STATUS_CHANGED: IntCounterVec = register_int_counter_vec!(
        opts!("order_changing_status_counter", "How many times status of order was changed"),
        &["service"]
    ).expect("FATAL: Failed to register ORDER_STATUS_CHANGED metric - check for duplicate registration");

    /// Partner status strings that did not map to an internal code
    pub static ref STATUS_MAPPING_ERRORS: IntCounterVec = register_int_counter_vec!(
        opts!("order_status_mapping_error", "How many errors raised while mapping order status"),
        &["service"]
    ).expect("FATAL: Failed to register STATUS_MAPPING_ERRORS metric - check for duplicate registration");
}

/// Record a successfully created order.
pub fn record_order_created(service: &str) {
    ORDERS_CREATED.with_label_values(&[service]).inc();
}

/// Record a failed order creation.
pub fn record_order_creation_error(service: &str) {
    ORDER_CREATION_ERRORS.with_label_values(&[service]).inc();
}

/// Record an observed status transition.
pub fn record_status_changed(service: &str) {
    ORDER_STATUS_CHANGED.with_label_values(&[service]).inc();
}

/// Record a partner status string with no internal mapping.
pub fn record_status_mapping_error(service: &str) {
    STATUS_MAPPING_ERRORS.with_label_values(&[service]).inc();
}

/// Get metrics as text for the /metrics endpoint.
///
/// Handles encoding errors gracefully instead of panicking.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}
