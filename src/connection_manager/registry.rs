use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::error::DispatchError;
use crate::gateway::GatewayRequest;

use super::stats::ConnectionStats;
use super::transport::{Transport, TransportResponse};

/// Why a send did not produce a gateway response
#[derive(Debug, Error)]
pub enum SendError {
    /// A request for this credential is already in flight
    #[error("a request is already in flight for this credential")]
    Busy,

    #[error(transparent)]
    Failed(DispatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    credential: String,
    endpoint: String,
}

/// Owns the outbound gateway channel and its per-credential in-flight slots.
///
/// The gateway penalizes concurrent batches from one sender, so each
/// credential/endpoint pair gets a single permit. A send that finds the
/// permit taken is refused with `SendError::Busy`; queueing is left to the
/// backlog owner.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    /// (credential, endpoint) -> single-permit slot
    slots: DashMap<SlotKey, Arc<Semaphore>>,
    requests_sent: AtomicU64,
    busy_rejections: AtomicU64,
    transport_failures: AtomicU64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            slots: DashMap::new(),
            requests_sent: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
        }
    }

    fn slot(&self, credential: &str, endpoint: &str) -> Arc<Semaphore> {
        let key = SlotKey {
            credential: credential.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.slots
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Whether a request for `credential` to `endpoint` is currently in flight
    pub fn is_busy(&self, credential: &str, endpoint: &str) -> bool {
        let key = SlotKey {
            credential: credential.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.slots
            .get(&key)
            .map_or(false, |slot| slot.available_permits() == 0)
    }

    /// Send `request` using the slot of `credential`.
    ///
    /// Transport failures become a whole-notification `Connection` error.
    pub async fn send(
        &self,
        credential: &str,
        correlation_id: &str,
        request: &GatewayRequest,
    ) -> Result<TransportResponse, SendError> {
        let slot = self.slot(credential, &request.url);
        let _permit = match slot.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.busy_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    correlation_id = %correlation_id,
                    endpoint = %request.url,
                    "Connection slot busy"
                );
                return Err(SendError::Busy);
            }
        };

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        match self.transport.send(request).await {
            Ok(response) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    status = response.status,
                    "Gateway responded"
                );
                Ok(response)
            }
            Err(e) => {
                self.transport_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    endpoint = %request.url,
                    error = %e,
                    "Gateway request failed"
                );
                Err(SendError::Failed(DispatchError::connection(
                    correlation_id,
                    e.to_string(),
                )))
            }
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            slots: self.slots.len(),
            in_flight: self
                .slots
                .iter()
                .filter(|slot| slot.value().available_permits() == 0)
                .count(),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::TransportError;
    use crate::error::DispatchErrorKind;
    use async_trait::async_trait;
    use reqwest::Method;
    use tokio::sync::Notify;

    fn request(url: &str) -> GatewayRequest {
        GatewayRequest {
            method: Method::POST,
            url: url.to_string(),
            headers: Vec::new(),
            body: b"{}".to_vec(),
        }
    }

    struct FixedTransport(std::result::Result<TransportResponse, TransportError>);

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            _request: &GatewayRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.0.clone()
        }
    }

    /// Holds every request open until released
    struct GatedTransport {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(
            &self,
            _request: &GatewayRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(TransportResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_send_returns_response() {
        let manager = ConnectionManager::new(Arc::new(FixedTransport(Ok(TransportResponse {
            status: 200,
            body: "{}".to_string(),
        }))));

        let response = manager.send("key", "n-1", &request("https://gw/send")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(manager.stats().requests_sent, 1);
        assert!(!manager.is_busy("key", "https://gw/send"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_connection_error() {
        let manager = ConnectionManager::new(Arc::new(FixedTransport(Err(
            TransportError::Connect("reset".to_string()),
        ))));

        match manager.send("key", "n-1", &request("https://gw/send")).await {
            Err(SendError::Failed(error)) => {
                assert_eq!(error.kind, DispatchErrorKind::Connection);
                assert_eq!(error.correlation_id, "n-1");
                assert!(error.affected.is_empty());
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(manager.stats().transport_failures, 1);
    }

    #[tokio::test]
    async fn test_second_send_for_same_credential_is_busy() {
        let transport = Arc::new(GatedTransport {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let manager = Arc::new(ConnectionManager::new(transport.clone()));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send("key", "n-1", &request("https://gw/send")).await })
        };
        transport.entered.notified().await;

        assert!(manager.is_busy("key", "https://gw/send"));
        let second = manager.send("key", "n-2", &request("https://gw/send")).await;
        assert!(matches!(second, Err(SendError::Busy)));

        transport.release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert!(!manager.is_busy("key", "https://gw/send"));

        let stats = manager.stats();
        assert_eq!(stats.busy_rejections, 1);
        assert_eq!(stats.requests_sent, 1);
    }

    #[tokio::test]
    async fn test_credentials_have_independent_slots() {
        let transport = Arc::new(GatedTransport {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let manager = Arc::new(ConnectionManager::new(transport.clone()));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send("key-a", "n-1", &request("https://gw/send")).await })
        };
        transport.entered.notified().await;

        assert!(manager.is_busy("key-a", "https://gw/send"));
        assert!(!manager.is_busy("key-b", "https://gw/send"));

        transport.release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(manager.stats().slots, 1);
    }

    #[test]
    fn test_busy_query_does_not_create_slots() {
        let manager = ConnectionManager::new(Arc::new(FixedTransport(Ok(TransportResponse {
            status: 200,
            body: "{}".to_string(),
        }))));

        assert!(!manager.is_busy("key", "https://gw/send"));
        assert!(!manager.is_busy("other", "https://gw/send"));
        assert_eq!(manager.stats().slots, 0);
    }
}
