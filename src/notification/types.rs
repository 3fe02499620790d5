use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// JSON object sent as the gateway request body, minus the device list
pub type Payload = Map<String, Value>;

/// Opaque registration handle of one device installation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A payload addressed to an ordered batch of devices.
///
/// Duplicate tokens are kept positionally: the gateway answers index by
/// index, so the device list order is part of the request contract.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    devices: Vec<DeviceToken>,
    payload: Payload,
    correlation_id: String,
    queued_at: DateTime<Utc>,
    attempts: u32,
}

impl Notification {
    /// Create a notification; fails when `devices` is empty
    pub fn new(
        devices: Vec<DeviceToken>,
        payload: Payload,
        correlation_id: impl Into<String>,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(AppError::Validation(
                "notification must address at least one device".to_string(),
            ));
        }

        Ok(Self {
            devices,
            payload,
            correlation_id: correlation_id.into(),
            queued_at: Utc::now(),
            attempts: 0,
        })
    }

    pub fn devices(&self) -> &[DeviceToken] {
        &self.devices
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn queued_at(&self) -> DateTime<Utc> {
        self.queued_at
    }

    /// Number of gateway round trips already made
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Narrow the device list to a resend set. An empty set is ignored so the
    /// notification never ends up addressing nobody.
    pub fn restrict_to(&mut self, devices: Vec<DeviceToken>) {
        if devices.is_empty() {
            return;
        }
        self.devices = devices;
    }
}

/// Wire shape of a notification handed in by a producer
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationInput {
    pub devices: Vec<DeviceToken>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TryFrom<NotificationInput> for Notification {
    type Error = AppError;

    fn try_from(input: NotificationInput) -> Result<Self> {
        let correlation_id = input
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Notification::new(input.devices, input.payload, correlation_id)
    }
}

/// Builder for creating notifications
#[derive(Debug, Clone, Default)]
pub struct NotificationBuilder {
    devices: Vec<DeviceToken>,
    payload: Payload,
    correlation_id: Option<String>,
}

impl NotificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one target device
    pub fn device(mut self, token: impl Into<DeviceToken>) -> Self {
        self.devices.push(token.into());
        self
    }

    /// Add several target devices, keeping their order
    pub fn devices<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DeviceToken>,
    {
        self.devices.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Set a single payload field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the whole payload
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Build the notification; a UUID correlation id is generated if none was set
    pub fn build(self) -> Result<Notification> {
        let correlation_id = self
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Notification::new(self.devices, self.payload, correlation_id)
    }
}
