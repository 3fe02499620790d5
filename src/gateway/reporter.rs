//! Conversion of classification and scheduling output into the report
//! handed to the backlog owner.

use serde::Serialize;

use crate::error::{DispatchError, DispatchErrorKind};
use crate::notification::{DeviceToken, Notification};

use super::classifier::ClassifiedResult;
use super::scheduler::Decision;

/// A device token the gateway rotated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRefresh {
    pub old: DeviceToken,
    pub new: DeviceToken,
}

/// Everything the backlog owner needs to act on after one dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub correlation_id: String,
    /// Devices the gateway accepted in this round trip
    pub delivered: Vec<DeviceToken>,
    pub refreshed: Vec<TokenRefresh>,
    pub errors: Vec<DispatchError>,
    /// Notification to resend, restricted to the eligible devices
    #[serde(skip)]
    pub resend: Option<Notification>,
}

impl DispatchReport {
    /// Fully delivered with nothing to act on
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.resend.is_none()
    }

    pub fn errors_of(&self, kind: DispatchErrorKind) -> impl Iterator<Item = &DispatchError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

/// Build the report for one dispatch and log each error it carries.
pub fn report(correlation_id: &str, classified: &ClassifiedResult, decision: Decision) -> DispatchReport {
    let (errors, resend) = match decision {
        Decision::Complete => (Vec::new(), None),
        Decision::Settle { errors } => (errors, None),
        Decision::Resend {
            notification,
            errors,
        } => (errors, Some(notification)),
    };

    for error in &errors {
        tracing::warn!(
            correlation_id = %error.correlation_id,
            kind = %error.kind,
            devices = error.affected.len(),
            detail = %error.detail,
            "Dispatch error"
        );
    }

    DispatchReport {
        correlation_id: correlation_id.to_string(),
        delivered: classified.delivered(),
        refreshed: classified
            .refreshed()
            .into_iter()
            .map(|(old, new)| TokenRefresh { old, new })
            .collect(),
        errors,
        resend,
    }
}
