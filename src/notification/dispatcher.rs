use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::connection_manager::{ConnectionManager, SendError};
use crate::error::{DispatchErrorKind, IntegrationError};
use crate::gateway::{report, ClassifiedResult, Decision, DispatchReport, PushProvider};
use crate::metrics::DispatchMetrics;

use super::Notification;

/// Dispatch outcomes that do not produce a report
#[derive(Debug, Error)]
pub enum DispatchFailure {
    /// The credential already has a request in flight; the notification is
    /// handed back untouched
    #[error("connection slot busy for notification {}", .0.correlation_id())]
    Busy(Notification),

    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

/// Statistics for the dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Batches that reached the gateway or failed in transport
    pub total_sent: AtomicU64,
    /// Devices accepted by the gateway
    pub devices_delivered: AtomicU64,
    /// Devices handed back for resend
    pub devices_resent: AtomicU64,
    pub connection_errors: AtomicU64,
    pub credentials_errors: AtomicU64,
    pub message_errors: AtomicU64,
    pub token_errors: AtomicU64,
    pub integration_errors: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            devices_delivered: self.devices_delivered.load(Ordering::Relaxed),
            devices_resent: self.devices_resent.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            credentials_errors: self.credentials_errors.load(Ordering::Relaxed),
            message_errors: self.message_errors.load(Ordering::Relaxed),
            token_errors: self.token_errors.load(Ordering::Relaxed),
            integration_errors: self.integration_errors.load(Ordering::Relaxed),
        }
    }

    fn record_report(&self, report: &DispatchReport) {
        self.devices_delivered
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);
        if let Some(resend) = &report.resend {
            self.devices_resent
                .fetch_add(resend.devices().len() as u64, Ordering::Relaxed);
        }

        for error in &report.errors {
            let counter = match error.kind {
                DispatchErrorKind::Connection => &self.connection_errors,
                DispatchErrorKind::Credentials => &self.credentials_errors,
                DispatchErrorKind::Message => &self.message_errors,
                DispatchErrorKind::Token => &self.token_errors,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_sent: u64,
    pub devices_delivered: u64,
    pub devices_resent: u64,
    pub connection_errors: u64,
    pub credentials_errors: u64,
    pub message_errors: u64,
    pub token_errors: u64,
    pub integration_errors: u64,
}

/// Runs one notification through build, send, classify and schedule
pub struct NotificationDispatcher {
    provider: Arc<dyn PushProvider>,
    connection_manager: Arc<ConnectionManager>,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>, connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            provider,
            connection_manager,
            stats: DispatcherStats::default(),
        }
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch a notification as one gateway batch.
    ///
    /// Never retries: a resend set, if any, comes back in the report.
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, notification),
        fields(
            provider = self.provider.name(),
            correlation_id = %notification.correlation_id(),
            devices = notification.devices().len()
        )
    )]
    pub async fn dispatch(&self, mut notification: Notification) -> Result<DispatchReport, DispatchFailure> {
        let correlation_id = notification.correlation_id().to_string();

        let request = match self.provider.build_request(&notification) {
            Ok(request) => request,
            Err(error) => {
                let classified = ClassifiedResult::Failed(error);
                let decision = self.provider.compute_retry_set(notification, &classified);
                return Ok(self.finish(&correlation_id, &classified, decision));
            }
        };

        let started = Instant::now();
        let sent = self
            .connection_manager
            .send(self.provider.credential(), &correlation_id, &request)
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(SendError::Busy) => {
                DispatchMetrics::record_busy();
                return Err(DispatchFailure::Busy(notification));
            }
            Err(SendError::Failed(error)) => {
                notification.record_attempt();
                self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
                let classified = ClassifiedResult::Failed(error);
                let decision = self.provider.compute_retry_set(notification, &classified);
                return Ok(self.finish(&correlation_id, &classified, decision));
            }
        };

        notification.record_attempt();
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_batch(
            self.provider.name(),
            notification.devices().len(),
            started.elapsed(),
        );
        tracing::info!(
            correlation_id = %correlation_id,
            devices = notification.devices().len(),
            status = response.status,
            attempt = notification.attempts(),
            queued_ms = (chrono::Utc::now() - notification.queued_at()).num_milliseconds(),
            "Batch sent"
        );

        let classified = match self.provider.classify_response(
            response.status,
            &response.body,
            notification.devices(),
            &correlation_id,
        ) {
            Ok(classified) => classified,
            Err(e) => {
                self.stats.integration_errors.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_integration_error();
                tracing::error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Gateway response could not be aligned with the request"
                );
                return Err(e.into());
            }
        };

        let decision = self.provider.compute_retry_set(notification, &classified);
        Ok(self.finish(&correlation_id, &classified, decision))
    }

    fn finish(
        &self,
        correlation_id: &str,
        classified: &ClassifiedResult,
        decision: Decision,
    ) -> DispatchReport {
        let report = report(correlation_id, classified, decision);

        self.stats.record_report(&report);
        DispatchMetrics::record_delivered(report.delivered.len());
        DispatchMetrics::record_refreshed(report.refreshed.len());
        if let Some(resend) = &report.resend {
            DispatchMetrics::record_resent(resend.devices().len());
        }
        for error in &report.errors {
            DispatchMetrics::record_error(error);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::connection_manager::{Transport, TransportError, TransportResponse};
    use crate::gateway::{GatewayRequest, GcmProvider};
    use crate::notification::{DeviceToken, NotificationBuilder};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned responses and records the request bodies it saw
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<TransportResponse, TransportError>>>,
        bodies: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                bodies: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &GatewayRequest) -> Result<TransportResponse, TransportError> {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&request.body).unwrap());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TransportError::Other("no scripted response".to_string())))
        }
    }

    fn ok(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    fn dispatcher(transport: Arc<ScriptedTransport>) -> NotificationDispatcher {
        let provider = Arc::new(GcmProvider::new(&GatewayConfig::with_key("secret")));
        NotificationDispatcher::new(provider, Arc::new(ConnectionManager::new(transport)))
    }

    fn note(devices: &[&str]) -> Notification {
        NotificationBuilder::new()
            .devices(devices.iter().copied())
            .field("title", "x")
            .correlation_id("n-1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_clean_dispatch_completes() {
        let transport = ScriptedTransport::new(vec![ok(200, r#"{"failure":0,"canonical_ids":0}"#)]);
        let dispatcher = dispatcher(transport.clone());

        let report = dispatcher.dispatch(note(&["a", "b"])).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.delivered.len(), 2);
        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies[0]["registration_ids"], serde_json::json!(["a", "b"]));
        assert_eq!(bodies[0]["title"], "x");
    }

    #[tokio::test]
    async fn test_partial_failure_hands_back_restricted_notification() {
        let body = r#"{"failure":2,"canonical_ids":0,"results":[
            {"message_id":"1"},{"error":"NotRegistered"},{"error":"Unavailable"}]}"#;
        let dispatcher = dispatcher(ScriptedTransport::new(vec![ok(200, body)]));

        let report = dispatcher.dispatch(note(&["A", "B", "C"])).await.unwrap();

        assert_eq!(report.delivered, vec![DeviceToken::from("A")]);
        let resend = report.resend.expect("resend set");
        assert_eq!(resend.devices(), &[DeviceToken::from("C")]);
        assert_eq!(resend.attempts(), 1);

        let stats = dispatcher.stats();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.devices_delivered, 1);
        assert_eq!(stats.devices_resent, 1);
        assert_eq!(stats.token_errors, 1);
        assert_eq!(stats.connection_errors, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_resends_whole_notification() {
        let dispatcher = dispatcher(ScriptedTransport::new(vec![Err(TransportError::Timeout(
            "30s".to_string(),
        ))]));

        let report = dispatcher.dispatch(note(&["a", "b"])).await.unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, DispatchErrorKind::Connection);
        assert_eq!(report.resend.map(|n| n.devices().len()), Some(2));
    }

    #[tokio::test]
    async fn test_misaligned_response_is_integration_failure() {
        let body = r#"{"failure":1,"canonical_ids":0,"results":[{"error":"Unavailable"}]}"#;
        let dispatcher = dispatcher(ScriptedTransport::new(vec![ok(200, body)]));

        let result = dispatcher.dispatch(note(&["a", "b"])).await;

        assert!(matches!(result, Err(DispatchFailure::Integration(_))));
        assert_eq!(dispatcher.stats().integration_errors, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal() {
        let dispatcher = dispatcher(ScriptedTransport::new(vec![ok(401, "Unauthorized")]));

        let report = dispatcher.dispatch(note(&["a"])).await.unwrap();

        assert!(report.resend.is_none());
        assert_eq!(report.errors[0].kind, DispatchErrorKind::Credentials);
        assert_eq!(dispatcher.stats().credentials_errors, 1);
    }
}
