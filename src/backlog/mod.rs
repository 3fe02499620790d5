//! Backlog owner for one credential.
//!
//! Holds notifications waiting for the connection slot, feeds them to the
//! dispatcher one at a time in submission order, and acts on each report:
//! resend sets go back on the queue after a backoff delay, token errors
//! update the registry, and everything else is terminal.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut backlog = Backlog::new(dispatcher, registry, &settings.backlog);
//! backlog.enqueue(notification);
//! let summary = backlog.run_until_idle().await;
//! ```

mod backoff;
mod registry;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BacklogConfig;
use crate::error::DispatchErrorKind;
use crate::gateway::DispatchReport;
use crate::notification::{DispatchFailure, Notification, NotificationDispatcher};

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use registry::{MemoryTokenRegistry, TokenRegistry};

/// Totals over everything the backlog processed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BacklogSummary {
    /// Notifications delivered to every device
    pub completed: usize,
    /// Notifications finished with terminal errors for some devices
    pub settled: usize,
    /// Notifications given up after the attempt limit
    pub exhausted: usize,
    /// Notifications dropped because the gateway response was unusable
    pub integration_failures: usize,
    /// Times a notification found the connection slot taken
    pub busy_retries: usize,
    pub devices_delivered: usize,
    pub tokens_removed: usize,
    pub tokens_replaced: usize,
}

struct Pending {
    notification: Notification,
    not_before: Option<Instant>,
}

pub struct Backlog {
    dispatcher: Arc<NotificationDispatcher>,
    registry: Arc<dyn TokenRegistry>,
    backoff: ExponentialBackoff,
    busy_delay: Duration,
    max_attempts: u32,
    pending: VecDeque<Pending>,
    summary: BacklogSummary,
}

impl Backlog {
    pub fn new(
        dispatcher: Arc<NotificationDispatcher>,
        registry: Arc<dyn TokenRegistry>,
        config: &BacklogConfig,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            backoff: ExponentialBackoff::with_config(BackoffConfig::from(config)),
            busy_delay: Duration::from_millis(config.busy_delay_ms),
            max_attempts: config.max_attempts.max(1),
            pending: VecDeque::new(),
            summary: BacklogSummary::default(),
        }
    }

    pub fn enqueue(&mut self, notification: Notification) {
        tracing::debug!(
            correlation_id = %notification.correlation_id(),
            devices = notification.devices().len(),
            "Notification queued"
        );
        self.pending.push_back(Pending {
            notification,
            not_before: None,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn summary(&self) -> &BacklogSummary {
        &self.summary
    }

    /// Dispatch until nothing is left to send, including resends.
    pub async fn run_until_idle(&mut self) -> BacklogSummary {
        while self.step().await {}
        self.summary.clone()
    }

    /// Dispatch the notification at the head of the queue.
    ///
    /// Returns `false` when the queue was empty.
    pub async fn step(&mut self) -> bool {
        let Some(pending) = self.pending.pop_front() else {
            return false;
        };
        if let Some(not_before) = pending.not_before {
            tokio::time::sleep_until(not_before).await;
        }

        match self.dispatcher.dispatch(pending.notification).await {
            Ok(report) => self.absorb(report),
            Err(DispatchFailure::Busy(notification)) => {
                // Busy says nothing about gateway health; leave the backoff alone.
                self.summary.busy_retries += 1;
                tracing::debug!(
                    correlation_id = %notification.correlation_id(),
                    delay_ms = self.busy_delay.as_millis() as u64,
                    "Connection busy, waiting for slot"
                );
                self.pending.push_front(Pending {
                    notification,
                    not_before: Some(Instant::now() + self.busy_delay),
                });
            }
            Err(DispatchFailure::Integration(e)) => {
                self.summary.integration_failures += 1;
                tracing::error!(error = %e, "Dropping notification after integration error");
            }
        }
        true
    }

    fn absorb(&mut self, report: DispatchReport) {
        self.summary.devices_delivered += report.delivered.len();

        for error in report.errors_of(DispatchErrorKind::Token) {
            for device in &error.affected {
                match &device.replacement {
                    Some(new) => {
                        self.registry.replace(&device.token, new);
                        self.summary.tokens_replaced += 1;
                    }
                    None => {
                        self.registry.remove(&device.token);
                        self.summary.tokens_removed += 1;
                    }
                }
            }
        }

        if report.errors_of(DispatchErrorKind::Connection).next().is_none() {
            self.backoff.reset();
        }

        let complete = report.is_complete();
        match report.resend {
            Some(notification) if notification.attempts() >= self.max_attempts => {
                self.summary.exhausted += 1;
                tracing::warn!(
                    correlation_id = %notification.correlation_id(),
                    attempts = notification.attempts(),
                    devices = notification.devices().len(),
                    "Giving up on notification after attempt limit"
                );
            }
            Some(notification) => {
                let delay = self.backoff.next_delay();
                tracing::info!(
                    correlation_id = %notification.correlation_id(),
                    devices = notification.devices().len(),
                    attempt = notification.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Requeued notification for resend"
                );
                self.pending.push_back(Pending {
                    notification,
                    not_before: Some(Instant::now() + delay),
                });
            }
            None if complete => self.summary.completed += 1,
            None => self.summary.settled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::connection_manager::{ConnectionManager, Transport, TransportError, TransportResponse};
    use crate::gateway::{GatewayRequest, GcmProvider, RequestBuilder};
    use crate::notification::{DeviceToken, NotificationBuilder};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<(u16, &'static str)>>,
        sent: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &GatewayRequest) -> Result<TransportResponse, TransportError> {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let devices = body["registration_ids"]
                .as_array()
                .unwrap()
                .iter()
                .map(|d| d.as_str().unwrap().to_string())
                .collect();
            self.sent.lock().unwrap().push(devices);

            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((503, ""));
            Ok(TransportResponse {
                status,
                body: body.to_string(),
            })
        }
    }

    fn config(max_attempts: u32) -> BacklogConfig {
        BacklogConfig {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 2.0,
            jitter_factor: 0.0,
            busy_delay_ms: 0,
        }
    }

    fn setup(
        responses: Vec<(u16, &'static str)>,
        max_attempts: u32,
    ) -> (Backlog, Arc<ScriptedTransport>, Arc<MemoryTokenRegistry>) {
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(responses.into()),
            sent: Mutex::new(Vec::new()),
        });
        let provider = Arc::new(GcmProvider::new(&GatewayConfig::with_key("secret")));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            provider,
            Arc::new(ConnectionManager::new(transport.clone())),
        ));
        let registry: Arc<MemoryTokenRegistry> =
            Arc::new(["A", "B", "C", "D"].into_iter().collect());
        let backlog = Backlog::new(dispatcher, registry.clone(), &config(max_attempts));
        (backlog, transport, registry)
    }

    fn note(devices: &[&str]) -> Notification {
        NotificationBuilder::new()
            .devices(devices.iter().copied())
            .field("title", "x")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_partial_failure_resends_only_retryable_devices() {
        let (mut backlog, transport, registry) = setup(
            vec![
                (
                    200,
                    r#"{"failure":2,"canonical_ids":0,"results":[
                    {"message_id":"1"},{"error":"NotRegistered"},{"error":"Unavailable"}]}"#,
                ),
                (200, r#"{"failure":0,"canonical_ids":0}"#),
            ],
            5,
        );
        backlog.enqueue(note(&["A", "B", "C"]));

        let summary = backlog.run_until_idle().await;

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![vec!["A", "B", "C"], vec!["C"]]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.devices_delivered, 2);
        assert_eq!(summary.tokens_removed, 1);
        assert!(!registry.contains(&DeviceToken::from("B")));
        assert!(backlog.is_empty());
    }

    #[tokio::test]
    async fn test_rotated_tokens_are_replaced() {
        let (mut backlog, _transport, registry) = setup(
            vec![(
                200,
                r#"{"failure":0,"canonical_ids":1,"results":[
                {"message_id":"1","registration_id":"A2"},{"message_id":"2"}]}"#,
            )],
            5,
        );
        backlog.enqueue(note(&["A", "D"]));

        let summary = backlog.run_until_idle().await;

        assert_eq!(summary.settled, 1);
        assert_eq!(summary.tokens_replaced, 1);
        assert_eq!(summary.devices_delivered, 2);
        assert!(registry.contains(&DeviceToken::from("A2")));
        assert!(!registry.contains(&DeviceToken::from("A")));
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_limit() {
        let (mut backlog, transport, _registry) = setup(Vec::new(), 3);
        backlog.enqueue(note(&["A", "B"]));

        let summary = backlog.run_until_idle().await;

        assert_eq!(transport.sent.lock().unwrap().len(), 3);
        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.completed, 0);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_resent() {
        let (mut backlog, transport, _registry) = setup(
            vec![
                (400, ""),
                (
                    200,
                    r#"{"failure":2,"canonical_ids":0,"results":[
                    {"error":"MismatchSenderId"},{"error":"Unavailable"}]}"#,
                ),
            ],
            5,
        );
        backlog.enqueue(note(&["A"]));
        backlog.enqueue(note(&["B", "C"]));

        let summary = backlog.run_until_idle().await;

        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        assert_eq!(summary.settled, 2);
    }

    #[tokio::test]
    async fn test_integration_error_drops_notification() {
        let (mut backlog, _transport, _registry) = setup(
            vec![(
                200,
                r#"{"failure":1,"canonical_ids":0,"results":[{"error":"Unavailable"}]}"#,
            )],
            5,
        );
        backlog.enqueue(note(&["A", "B"]));

        let summary = backlog.run_until_idle().await;
        assert_eq!(summary.integration_failures, 1);
    }

    /// Holds the first request until released; later requests succeed at once
    struct HeldTransport {
        held: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        sent: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for HeldTransport {
        async fn send(&self, request: &GatewayRequest) -> Result<TransportResponse, TransportError> {
            if !self.held.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            } else {
                let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                let devices = serde_json::from_value(body["registration_ids"].clone()).unwrap();
                self.sent.lock().unwrap().push(devices);
            }
            Ok(TransportResponse {
                status: 200,
                body: r#"{"failure":0,"canonical_ids":0}"#.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_busy_requeues_at_front_without_attempt() {
        let transport = Arc::new(HeldTransport {
            held: std::sync::atomic::AtomicBool::new(false),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            sent: Mutex::new(Vec::new()),
        });
        let gateway = GatewayConfig::with_key("secret");
        let manager = Arc::new(ConnectionManager::new(transport.clone()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(GcmProvider::new(&gateway)),
            manager.clone(),
        ));
        let registry = Arc::new(MemoryTokenRegistry::new());
        let mut backlog = Backlog::new(dispatcher, registry, &config(5));

        // Another owner of the same credential holds the slot.
        let held = {
            let manager = manager.clone();
            let request = RequestBuilder::new(&gateway).build(&note(&["X"])).unwrap();
            tokio::spawn(async move { manager.send("secret", "held", &request).await })
        };
        transport.entered.notified().await;

        backlog.enqueue(note(&["A"]));
        backlog.enqueue(note(&["B"]));
        assert!(backlog.step().await);

        assert_eq!(backlog.len(), 2);
        let head = &backlog.pending.front().unwrap().notification;
        assert_eq!(head.devices(), &[DeviceToken::from("A")]);
        assert_eq!(head.attempts(), 0);
        assert_eq!(backlog.summary().busy_retries, 1);
        assert_eq!(backlog.backoff.attempt(), 0);

        transport.release.notify_one();
        held.await.unwrap().unwrap();

        let summary = backlog.run_until_idle().await;
        assert_eq!(
            transport.sent.lock().unwrap().clone(),
            vec![vec!["A".to_string()], vec!["B".to_string()]]
        );
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.busy_retries, 1);
    }
}
