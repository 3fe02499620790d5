//! Provider seam between the dispatcher and a concrete push gateway.

use crate::config::GatewayConfig;
use crate::error::{DispatchError, IntegrationError};
use crate::notification::{DeviceToken, Notification};

use super::classifier::{classify, ClassifiedResult};
use super::request::{GatewayRequest, RequestBuilder};
use super::scheduler::{schedule, Decision};

/// A push gateway backend.
///
/// Each provider builds its own batch requests and reads its own responses,
/// but all of them report through the same `ClassifiedResult` and `Decision`
/// contracts so one backlog owner can drive any of them.
pub trait PushProvider: Send + Sync {
    /// Short provider name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Credential identifying the sender; one request may be in flight per credential
    fn credential(&self) -> &str;

    fn build_request(&self, notification: &Notification) -> Result<GatewayRequest, DispatchError>;

    fn classify_response(
        &self,
        status: u16,
        body: &str,
        devices: &[DeviceToken],
        correlation_id: &str,
    ) -> Result<ClassifiedResult, IntegrationError>;

    fn compute_retry_set(&self, notification: Notification, classified: &ClassifiedResult) -> Decision {
        schedule(notification, classified)
    }
}

/// Google Cloud Messaging HTTP gateway
#[derive(Debug, Clone)]
pub struct GcmProvider {
    builder: RequestBuilder,
}

impl GcmProvider {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            builder: RequestBuilder::new(config),
        }
    }
}

impl PushProvider for GcmProvider {
    fn name(&self) -> &'static str {
        "gcm"
    }

    fn credential(&self) -> &str {
        self.builder.credential()
    }

    fn build_request(&self, notification: &Notification) -> Result<GatewayRequest, DispatchError> {
        self.builder.build(notification)
    }

    fn classify_response(
        &self,
        status: u16,
        body: &str,
        devices: &[DeviceToken],
        correlation_id: &str,
    ) -> Result<ClassifiedResult, IntegrationError> {
        classify(status, body, devices, correlation_id)
    }
}
