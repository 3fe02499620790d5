//! Connection statistics

use serde::Serialize;

/// Snapshot of the connection manager's slots and counters
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    /// Credential/endpoint pairs seen so far
    pub slots: usize,
    /// Slots with a request currently in flight
    pub in_flight: usize,
    pub requests_sent: u64,
    pub busy_rejections: u64,
    pub transport_failures: u64,
}
