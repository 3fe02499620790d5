//! Gateway batch request construction.

use reqwest::Method;

use crate::config::GatewayConfig;
use crate::error::DispatchError;
use crate::notification::Notification;

/// Body field carrying the target device tokens
pub const REGISTRATION_IDS_FIELD: &str = "registration_ids";

/// Fully serialized HTTP request for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl GatewayRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serializes notifications into gateway batch requests.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: String,
    key: String,
}

impl RequestBuilder {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            url: config.endpoint_url(),
            key: config.key.clone(),
        }
    }

    /// Credential this builder signs requests with
    pub fn credential(&self) -> &str {
        &self.key
    }

    /// Build the POST request for `notification`.
    ///
    /// The payload must not already contain `registration_ids`; it is
    /// overwritten with the device list in its original order.
    pub fn build(&self, notification: &Notification) -> Result<GatewayRequest, DispatchError> {
        let mut content = notification.payload().clone();
        tracing::debug!(
            correlation_id = %notification.correlation_id(),
            content = ?content,
            devices = ?notification.devices(),
            "Constructing gateway request"
        );

        content.insert(
            REGISTRATION_IDS_FIELD.to_string(),
            serde_json::to_value(notification.devices())
                .map_err(|e| DispatchError::message(notification.correlation_id(), e.to_string()))?,
        );

        let body = serde_json::to_vec(&content)
            .map_err(|e| DispatchError::message(notification.correlation_id(), e.to_string()))?;
        tracing::debug!(
            correlation_id = %notification.correlation_id(),
            body = %String::from_utf8_lossy(&body),
            "Final gateway request body"
        );

        let headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("Content-Length", body.len().to_string()),
            ("Authorization", format!("key={}", self.key)),
        ];

        Ok(GatewayRequest {
            method: Method::POST,
            url: self.url.clone(),
            headers,
            body,
        })
    }
}
