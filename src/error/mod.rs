//! Error types surfaced by the dispatch pipeline.
//!
//! - `DispatchError`: a classified gateway outcome handed to the backlog owner
//! - `IntegrationError`: the gateway broke its response contract (fatal)
//! - `AppError`: configuration and plumbing failures

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::notification::DeviceToken;

/// Category of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    /// Gateway or network unavailable; the notification may be resent
    Connection,
    /// Sender identity rejected or not owning the device
    Credentials,
    /// Payload malformed; never resent as-is
    Message,
    /// Device tokens invalid or rotated
    Token,
}

impl DispatchErrorKind {
    /// Whether the backlog owner may resend after this error
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Connection)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Credentials => "credentials",
            Self::Message => "message",
            Self::Token => "token",
        }
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device named by a dispatch error, with its replacement token when the
/// gateway rotated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedDevice {
    pub token: DeviceToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<DeviceToken>,
}

impl AffectedDevice {
    pub fn new(token: DeviceToken) -> Self {
        Self {
            token,
            replacement: None,
        }
    }

    pub fn replaced(token: DeviceToken, replacement: DeviceToken) -> Self {
        Self {
            token,
            replacement: Some(replacement),
        }
    }
}

/// Typed failure of one notification dispatch.
///
/// `Token` and `Credentials` errors raised from per-device results always
/// name the devices they concern. Whole-notification errors carry no devices.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} error for notification {correlation_id}: {detail}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub correlation_id: String,
    pub detail: String,
    pub affected: Vec<AffectedDevice>,
}

impl DispatchError {
    fn whole(
        kind: DispatchErrorKind,
        correlation_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            correlation_id: correlation_id.into(),
            detail: detail.into(),
            affected: Vec::new(),
        }
    }

    pub fn connection(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::whole(DispatchErrorKind::Connection, correlation_id, detail)
    }

    /// Credential rejected for the whole notification (HTTP 401)
    pub fn credentials(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::whole(DispatchErrorKind::Credentials, correlation_id, detail)
    }

    pub fn message(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::whole(DispatchErrorKind::Message, correlation_id, detail)
    }

    /// Credential does not own these devices
    pub fn credentials_for(
        correlation_id: impl Into<String>,
        detail: impl Into<String>,
        devices: Vec<DeviceToken>,
    ) -> Self {
        Self {
            kind: DispatchErrorKind::Credentials,
            correlation_id: correlation_id.into(),
            detail: detail.into(),
            affected: devices.into_iter().map(AffectedDevice::new).collect(),
        }
    }

    pub fn token(
        correlation_id: impl Into<String>,
        detail: impl Into<String>,
        affected: Vec<AffectedDevice>,
    ) -> Self {
        Self {
            kind: DispatchErrorKind::Token,
            correlation_id: correlation_id.into(),
            detail: detail.into(),
            affected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn affected_tokens(&self) -> impl Iterator<Item = &DeviceToken> {
        self.affected.iter().map(|d| &d.token)
    }
}

/// The gateway response violated its contract with the request.
///
/// Index alignment between request tokens and response results is the only
/// way to attribute outcomes to devices, so these are never recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrationError {
    #[error(
        "gateway returned {actual} results for {expected} devices (notification {correlation_id})"
    )]
    ResultsMisaligned {
        correlation_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("gateway reported failures without a results array (notification {correlation_id})")]
    MissingResults { correlation_id: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_is_retryable() {
        assert!(DispatchErrorKind::Connection.is_retryable());
        assert!(!DispatchErrorKind::Credentials.is_retryable());
        assert!(!DispatchErrorKind::Message.is_retryable());
        assert!(!DispatchErrorKind::Token.is_retryable());
    }

    #[test]
    fn test_whole_notification_errors_carry_no_devices() {
        let err = DispatchError::message("n-1", "bad payload");
        assert_eq!(err.kind, DispatchErrorKind::Message);
        assert!(err.affected.is_empty());

        let err = DispatchError::connection("n-1", "unavailable");
        assert!(err.is_retryable());
        assert!(err.affected.is_empty());
    }

    #[test]
    fn test_credentials_for_names_devices() {
        let err = DispatchError::credentials_for(
            "n-2",
            "mismatched sender",
            vec![DeviceToken::from("a"), DeviceToken::from("b")],
        );
        let tokens: Vec<&str> = err.affected_tokens().map(|t| t.as_str()).collect();
        assert_eq!(tokens, vec!["a", "b"]);
        assert!(err.affected.iter().all(|d| d.replacement.is_none()));
    }

    #[test]
    fn test_display_includes_kind_and_correlation() {
        let err = DispatchError::connection("n-3", "GCM Unavailable");
        assert_eq!(
            err.to_string(),
            "connection error for notification n-3: GCM Unavailable"
        );
    }

    #[test]
    fn test_integration_error_display() {
        let err = IntegrationError::ResultsMisaligned {
            correlation_id: "n-4".to_string(),
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("2 results for 3 devices"));
    }
}
