//! Notifications addressed to batches of device tokens, and their dispatch.

mod dispatcher;
mod types;

pub use dispatcher::{
    DispatchFailure, DispatcherStats, DispatcherStatsSnapshot, NotificationDispatcher,
};
pub use types::{DeviceToken, Notification, NotificationBuilder, NotificationInput, Payload};
