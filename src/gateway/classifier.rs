//! Classification of gateway responses into per-device outcomes.
//!
//! The gateway answers a batch with one HTTP status and one JSON body that
//! mixes batch-level failure with per-index device results. `classify` turns
//! that into either a single whole-notification error or one outcome per
//! device, in request order.

use crate::error::{AffectedDevice, DispatchError, IntegrationError};
use crate::notification::DeviceToken;

use super::response::{BatchResponse, ErrorCode};

/// Classified fate of one device within one batch response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    /// Delivered, but the registry must swap in the canonical token
    TokenShouldRefresh(DeviceToken),
    TokenInvalid,
    /// The credential does not own this device
    SenderMismatch,
    Retryable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub device: DeviceToken,
    pub disposition: Disposition,
}

/// Per-device classification of a 200 response that reported failures or
/// canonical id changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerDeviceResult {
    /// One outcome per sent device, in request order
    pub outcomes: Vec<DeviceOutcome>,
    /// Token error first, then either the credentials error or the
    /// connection error that accompanies `resend`
    pub errors: Vec<DispatchError>,
    /// Devices to resend; empty when any device hit a sender mismatch
    pub resend: Vec<DeviceToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedResult {
    /// Every device accepted without token changes
    Delivered { devices: Vec<DeviceToken> },
    /// The whole notification failed
    Failed(DispatchError),
    PerDevice(PerDeviceResult),
}

impl ClassifiedResult {
    /// Devices accepted by the gateway, including those whose token rotated
    pub fn delivered(&self) -> Vec<DeviceToken> {
        match self {
            Self::Delivered { devices } => devices.clone(),
            Self::Failed(_) => Vec::new(),
            Self::PerDevice(result) => result
                .outcomes
                .iter()
                .filter(|o| {
                    matches!(
                        o.disposition,
                        Disposition::Delivered | Disposition::TokenShouldRefresh(_)
                    )
                })
                .map(|o| o.device.clone())
                .collect(),
        }
    }

    /// `(old, new)` token pairs reported by the gateway
    pub fn refreshed(&self) -> Vec<(DeviceToken, DeviceToken)> {
        match self {
            Self::PerDevice(result) => result
                .outcomes
                .iter()
                .filter_map(|o| match &o.disposition {
                    Disposition::TokenShouldRefresh(new) => Some((o.device.clone(), new.clone())),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Classify a gateway response for the devices it was sent to.
///
/// Returns `Err` only when the results array cannot be aligned with
/// `devices`; every other failure is a `DispatchError` inside the result.
pub fn classify(
    status: u16,
    body: &str,
    devices: &[DeviceToken],
    correlation_id: &str,
) -> Result<ClassifiedResult, IntegrationError> {
    let failed = |error: DispatchError| -> Result<ClassifiedResult, IntegrationError> {
        Ok(ClassifiedResult::Failed(error))
    };

    match status {
        s if s >= 500 => return failed(DispatchError::connection(correlation_id, "GCM Unavailable")),
        401 => return failed(DispatchError::credentials(correlation_id, "GCM Unauthorized")),
        400 => return failed(DispatchError::message(correlation_id, "GCM Bad message")),
        200 => {}
        other => {
            return failed(DispatchError::connection(
                correlation_id,
                format!("GCM Bad response code {}", other),
            ))
        }
    }

    let response = match BatchResponse::parse(body) {
        Ok(response) => response,
        Err(detail) => return failed(DispatchError::connection(correlation_id, detail)),
    };

    if response.is_clean() {
        return Ok(ClassifiedResult::Delivered {
            devices: devices.to_vec(),
        });
    }

    let results = response
        .results()
        .ok_or_else(|| IntegrationError::MissingResults {
            correlation_id: correlation_id.to_string(),
        })?;

    if results.len() != devices.len() {
        return Err(IntegrationError::ResultsMisaligned {
            correlation_id: correlation_id.to_string(),
            expected: devices.len(),
            actual: results.len(),
        });
    }

    let mut outcomes = Vec::with_capacity(devices.len());
    let mut invalid_tokens = Vec::new();
    let mut mismatched = Vec::new();
    let mut resend = Vec::new();

    for (device, entry) in devices.iter().zip(&results) {
        let disposition = if entry.is_delivered() {
            match entry.registration_id() {
                Some(new) => {
                    let new = DeviceToken::from(new);
                    invalid_tokens.push(AffectedDevice::replaced(device.clone(), new.clone()));
                    Disposition::TokenShouldRefresh(new)
                }
                None => Disposition::Delivered,
            }
        } else {
            match entry.error() {
                Some(ErrorCode::MessageTooBig) => {
                    return failed(DispatchError::message(correlation_id, "GCM Message Too Big"))
                }
                Some(ErrorCode::InvalidDataKey) => {
                    return failed(DispatchError::message(
                        correlation_id,
                        format!("Invalid Data Key: {}", body),
                    ))
                }
                Some(ErrorCode::InvalidTtl) => {
                    return failed(DispatchError::message(
                        correlation_id,
                        format!("Invalid Time To Live: {}", body),
                    ))
                }
                Some(ErrorCode::InvalidPackageName) => {
                    return failed(DispatchError::message(
                        correlation_id,
                        format!("Invalid Package Name: {}", body),
                    ))
                }
                Some(ErrorCode::Unavailable) | Some(ErrorCode::InternalServerError) => {
                    resend.push(device.clone());
                    Disposition::Retryable
                }
                Some(ErrorCode::MismatchSenderId) => {
                    mismatched.push(device.clone());
                    Disposition::SenderMismatch
                }
                Some(ErrorCode::NotRegistered)
                | Some(ErrorCode::InvalidRegistration)
                | Some(ErrorCode::Other(_))
                | None => {
                    invalid_tokens.push(AffectedDevice::new(device.clone()));
                    Disposition::TokenInvalid
                }
            }
        };

        outcomes.push(DeviceOutcome {
            device: device.clone(),
            disposition,
        });
    }

    let mut errors = Vec::new();
    if !invalid_tokens.is_empty() {
        errors.push(DispatchError::token(
            correlation_id,
            "GCM Invalid tokens",
            invalid_tokens,
        ));
    }

    if !mismatched.is_empty() {
        // Mismatched senders take priority: nothing is resent.
        errors.push(DispatchError::credentials_for(
            correlation_id,
            "GCM Mismatched Sender",
            mismatched,
        ));
        resend.clear();
    } else if !resend.is_empty() {
        errors.push(DispatchError::connection(correlation_id, "GCM Unavailable"));
    }

    Ok(ClassifiedResult::PerDevice(PerDeviceResult {
        outcomes,
        errors,
        resend,
    }))
}
