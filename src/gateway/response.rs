//! Wire format of the gateway's batch response.

use serde_json::Value;

/// Aggregate response body for one batch.
///
/// Held as loose JSON: only `failure`, `canonical_ids` and `results` carry
/// meaning, and the gateway is free to put anything else next to them.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    body: Value,
}

impl BatchResponse {
    /// Parse a response body; anything that is not a JSON object is rejected.
    pub fn parse(body: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(body) {
            Ok(body) if body.is_object() => Ok(Self { body }),
            Ok(other) => Err(format!("GCM response is not an object: {}", other)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Zero failures and zero canonical id changes; every device was accepted
    /// as sent and the per-device results need not be read.
    pub fn is_clean(&self) -> bool {
        is_zero(self.body.get("failure")) && is_zero(self.body.get("canonical_ids"))
    }

    /// Per-device results, index-aligned with `registration_ids`
    pub fn results(&self) -> Option<Vec<ResultEntry>> {
        self.body
            .get("results")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().map(ResultEntry::from_value).collect())
    }
}

fn is_zero(value: Option<&Value>) -> bool {
    value.and_then(Value::as_f64) == Some(0.0)
}

/// Result for one device of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultEntry {
    delivered: bool,
    /// Canonical token replacing the one sent
    registration_id: Option<String>,
    error: Option<String>,
}

impl ResultEntry {
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).filter(|v| is_truthy(v));
        Self {
            delivered: field("message_id").is_some(),
            registration_id: field("registration_id").map(text),
            error: field("error").map(text),
        }
    }

    /// Whether the gateway assigned a message id to this device
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    pub fn registration_id(&self) -> Option<&str> {
        self.registration_id.as_deref()
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.error.as_deref().map(ErrorCode::from)
    }
}

/// Loose presence check: null, false, zero and empty strings count as absent.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-device error vocabulary of the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    MessageTooBig,
    InvalidDataKey,
    InvalidTtl,
    InvalidPackageName,
    Unavailable,
    InternalServerError,
    MismatchSenderId,
    NotRegistered,
    InvalidRegistration,
    Other(String),
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        match value {
            "MessageTooBig" => Self::MessageTooBig,
            "InvalidDataKey" => Self::InvalidDataKey,
            "InvalidTtl" => Self::InvalidTtl,
            "InvalidPackageName" => Self::InvalidPackageName,
            "Unavailable" => Self::Unavailable,
            "InternalServerError" => Self::InternalServerError,
            "MismatchSenderId" => Self::MismatchSenderId,
            "NotRegistered" => Self::NotRegistered,
            "InvalidRegistration" => Self::InvalidRegistration,
            other => Self::Other(other.to_string()),
        }
    }
}
