//! Push gateway request/response handling.
//!
//! - `request`: serializes a notification into a batch request
//! - `classifier`: reads the gateway response into per-device outcomes
//! - `scheduler`: decides which devices may be resent
//! - `reporter`: shapes the result handed to the backlog owner
//! - `provider`: the `PushProvider` seam and the GCM implementation

mod classifier;
mod provider;
mod reporter;
mod request;
mod response;
mod scheduler;

pub use classifier::{classify, ClassifiedResult, DeviceOutcome, Disposition, PerDeviceResult};
pub use provider::{GcmProvider, PushProvider};
pub use reporter::{report, DispatchReport, TokenRefresh};
pub use request::{GatewayRequest, RequestBuilder, REGISTRATION_IDS_FIELD};
pub use response::{BatchResponse, ErrorCode, ResultEntry};
pub use scheduler::{schedule, Decision};
