//! Recording helpers over the raw metric statics.

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::error::DispatchError;

use super::*;

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a batch handed to the gateway
    pub fn record_batch(provider: &str, devices: usize, latency: Duration) {
        BATCHES_SENT_TOTAL.with_label_values(&[provider]).inc();
        BATCH_SIZE.observe(devices as f64);
        BATCH_LATENCY.observe(latency.as_secs_f64());
    }

    pub fn record_busy() {
        BUSY_REJECTIONS_TOTAL.inc();
    }

    pub fn record_delivered(count: usize) {
        DEVICES_DELIVERED_TOTAL.inc_by(count as u64);
    }

    pub fn record_refreshed(count: usize) {
        TOKENS_REFRESHED_TOTAL.inc_by(count as u64);
    }

    pub fn record_resent(count: usize) {
        DEVICES_RESENT_TOTAL.inc_by(count as u64);
    }

    pub fn record_error(error: &DispatchError) {
        DISPATCH_ERRORS_TOTAL
            .with_label_values(&[error.kind.as_str()])
            .inc();
    }

    pub fn record_integration_error() {
        INTEGRATION_ERRORS_TOTAL.inc();
    }
}
