//! Outbound gateway channel with one in-flight request per credential.

mod registry;
mod stats;
mod transport;

pub use registry::{ConnectionManager, SendError};
pub use stats::ConnectionStats;
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
