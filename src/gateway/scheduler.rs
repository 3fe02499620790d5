//! Resend decisions for a classified notification.
//!
//! Nothing here waits or resends. The scheduler only decides which devices
//! are eligible for another attempt and hands the notification back to the
//! backlog owner, which governs timing and attempt limits.

use crate::error::{DispatchError, DispatchErrorKind};
use crate::notification::Notification;

use super::classifier::ClassifiedResult;

/// Fate of a notification after one round trip
#[derive(Debug, Clone)]
pub enum Decision {
    /// Every device accepted; the notification is done
    Complete,
    /// Nothing left to resend; the errors are terminal for the devices they name
    Settle { errors: Vec<DispatchError> },
    /// Resend `notification` (whole, or restricted to the resend set)
    Resend {
        notification: Notification,
        errors: Vec<DispatchError>,
    },
}

impl Decision {
    pub fn errors(&self) -> &[DispatchError] {
        match self {
            Self::Complete => &[],
            Self::Settle { errors } | Self::Resend { errors, .. } => errors,
        }
    }
}

/// Decide what happens to `notification` given its classified response.
pub fn schedule(mut notification: Notification, classified: &ClassifiedResult) -> Decision {
    match classified {
        ClassifiedResult::Delivered { .. } => Decision::Complete,
        ClassifiedResult::Failed(error) if error.kind == DispatchErrorKind::Connection => {
            Decision::Resend {
                notification,
                errors: vec![error.clone()],
            }
        }
        ClassifiedResult::Failed(error) => Decision::Settle {
            errors: vec![error.clone()],
        },
        ClassifiedResult::PerDevice(result) => {
            if !result.resend.is_empty() {
                notification.restrict_to(result.resend.clone());
                Decision::Resend {
                    notification,
                    errors: result.errors.clone(),
                }
            } else if result.errors.is_empty() {
                Decision::Complete
            } else {
                Decision::Settle {
                    errors: result.errors.clone(),
                }
            }
        }
    }
}
