//! Prometheus metrics for the dispatch engine.
//!
//! - Batch metrics (requests sent, devices per batch, busy rejections)
//! - Device outcome metrics (delivered, refreshed, resent)
//! - Error metrics by dispatch error kind

mod helpers;

pub use helpers::{encode_metrics, DispatchMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "push_dispatch";

lazy_static! {
    // ============================================================================
    // Batch Metrics
    // ============================================================================

    /// Batches sent to the gateway, by provider
    pub static ref BATCHES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_batches_sent_total", METRIC_PREFIX),
        "Total batch requests sent to the gateway",
        &["provider"]
    ).unwrap();

    /// Devices addressed per batch
    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        format!("{}_batch_size", METRIC_PREFIX),
        "Distribution of devices per batch",
        vec![1.0, 10.0, 100.0, 250.0, 500.0, 1000.0]
    ).unwrap();

    /// Sends refused because the credential already had a request in flight
    pub static ref BUSY_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_busy_rejections_total", METRIC_PREFIX),
        "Total sends refused while a request was in flight"
    ).unwrap();

    /// Round trip time of a batch request
    pub static ref BATCH_LATENCY: Histogram = register_histogram!(
        format!("{}_batch_latency_seconds", METRIC_PREFIX),
        "Gateway round trip latency in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Device Metrics
    // ============================================================================

    /// Devices accepted by the gateway
    pub static ref DEVICES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_devices_delivered_total", METRIC_PREFIX),
        "Total devices the gateway accepted"
    ).unwrap();

    /// Devices whose token the gateway rotated
    pub static ref TOKENS_REFRESHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tokens_refreshed_total", METRIC_PREFIX),
        "Total device tokens replaced by a canonical id"
    ).unwrap();

    /// Devices handed back for resend
    pub static ref DEVICES_RESENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_devices_resent_total", METRIC_PREFIX),
        "Total devices returned to the backlog for resend"
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Dispatch errors by kind
    pub static ref DISPATCH_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_errors_total", METRIC_PREFIX),
        "Total dispatch errors",
        &["kind"]
    ).unwrap();

    /// Gateway responses that broke the results alignment contract
    pub static ref INTEGRATION_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_integration_errors_total", METRIC_PREFIX),
        "Total gateway responses that could not be aligned with the request"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // Initialize some metrics first (lazy_static requires first access)
        BATCHES_SENT_TOTAL.with_label_values(&["gcm"]).inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("push_dispatch_batches_sent_total"));
    }

    #[test]
    fn test_error_metrics() {
        DISPATCH_ERRORS_TOTAL.with_label_values(&["token"]).inc();
        INTEGRATION_ERRORS_TOTAL.inc();
        // Just verify no panics
    }
}
