//! Invocation driver.
//!
//! Each invocation runs as its own task: it selects a connection for its
//! target, sends, and waits for the response. Retryable failures are retried
//! with the same correlation id against a freshly selected connection, so an
//! operation for a partition follows the partition to its new owner. The
//! whole sequence is bounded by the invocation deadline.

use std::sync::Arc;
use std::time::Duration;

use gridwire_core::protocol::messages::error::{decode_error_response, is_error_response};
use gridwire_core::{ClientMessage, GridError, Result};
use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{InvocationFuture, InvocationState, InvocationTarget};
use crate::config::InvocationConfig;
use crate::connection::{Connection, ConnectionManager};

struct Invocation {
    correlation_id: i64,
    message: ClientMessage,
    target: InvocationTarget,
    deadline: Instant,
    attempt: u32,
    state: InvocationState,
    connection: Option<Arc<Connection>>,
    last_error: Option<GridError>,
}

/// Sends requests to the cluster and retries them on retryable failures.
#[derive(Debug)]
pub struct InvocationService {
    config: InvocationConfig,
    manager: Arc<ConnectionManager>,
    permits: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl InvocationService {
    /// Creates the service on top of `manager`.
    pub fn new(config: InvocationConfig, manager: Arc<ConnectionManager>) -> Arc<Self> {
        let permits = match config.max_concurrent() {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };
        Arc::new(Self {
            config,
            manager,
            permits,
            shutdown: CancellationToken::new(),
        })
    }

    /// Sends `message` to `target` with the configured invocation timeout.
    pub fn invoke(self: &Arc<Self>, message: ClientMessage, target: InvocationTarget) -> InvocationFuture {
        self.invoke_with_timeout(message, target, self.config.timeout())
    }

    /// Sends `message` to `target`, failing with [`GridError::Timeout`] if no
    /// response arrived within `timeout`, retries included.
    ///
    /// A correlation id is assigned here and kept across retries. For
    /// partition targets the message's partition id is set as well.
    pub fn invoke_with_timeout(
        self: &Arc<Self>,
        mut message: ClientMessage,
        target: InvocationTarget,
        timeout: Duration,
    ) -> InvocationFuture {
        let correlation_id = self.manager.next_correlation_id();
        message.set_correlation_id(correlation_id);
        if let InvocationTarget::Partition(partition_id) = target {
            message.set_partition_id(partition_id);
        }

        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let future = InvocationFuture::new(correlation_id, rx, cancel.clone());

        if self.shutdown.is_cancelled() {
            let _ = tx.send(Err(GridError::ClientNotActive("client is shut down".to_string())));
            return future;
        }

        let invocation = Invocation {
            correlation_id,
            message,
            target,
            deadline: Instant::now() + timeout,
            attempt: 0,
            state: InvocationState::Created,
            connection: None,
            last_error: None,
        };
        tokio::spawn(Arc::clone(self).run(invocation, tx, cancel));
        future
    }

    /// Fails every running invocation with [`GridError::ClientNotActive`]
    /// and rejects new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }

    #[instrument(
        name = "invocation",
        skip_all,
        fields(correlation_id = invocation.correlation_id, target = %invocation.target)
    )]
    async fn run(
        self: Arc<Self>,
        mut invocation: Invocation,
        tx: oneshot::Sender<Result<ClientMessage>>,
        cancel: CancellationToken,
    ) {
        let deadline = invocation.deadline;
        let correlation_id = invocation.correlation_id;
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                Err(GridError::ClientNotActive("client is shutting down".to_string()))
            }
            _ = cancel.cancelled() => {
                Err(GridError::Cancelled(format!("invocation {} was cancelled", correlation_id)))
            }
            result = tokio::time::timeout_at(deadline, self.drive(&mut invocation)) => {
                result.unwrap_or_else(|_| Err(GridError::Timeout(String::new())))
            }
        };

        // The response can no longer be matched once the caller gave up.
        if let Some(connection) = invocation.connection.take() {
            connection.deregister(correlation_id);
        }

        let outcome = match outcome {
            Ok(response) => {
                invocation.state = InvocationState::Completed;
                Ok(response)
            }
            Err(GridError::Timeout(detail)) => {
                invocation.state = InvocationState::TimedOut;
                Err(self.timeout_error(&invocation, detail))
            }
            Err(e @ GridError::Cancelled(_)) => {
                invocation.state = InvocationState::Cancelled;
                Err(e)
            }
            Err(e) => {
                invocation.state = InvocationState::Failed;
                Err(e)
            }
        };

        tracing::debug!(
            attempts = invocation.attempt,
            state = ?invocation.state,
            "invocation finished"
        );
        let _ = tx.send(outcome);
    }

    fn timeout_error(&self, invocation: &Invocation, detail: String) -> GridError {
        let mut message = format!(
            "invocation {} to {} timed out after {} attempt(s)",
            invocation.correlation_id, invocation.target, invocation.attempt
        );
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(&detail);
        } else if let Some(last) = &invocation.last_error {
            message.push_str(&format!(", last error: {}", last));
        }
        GridError::Timeout(message)
    }

    async fn drive(&self, invocation: &mut Invocation) -> Result<ClientMessage> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                Arc::clone(permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| GridError::ClientNotActive("client is shut down".to_string()))?,
            ),
            None => None,
        };

        loop {
            invocation.attempt += 1;
            let error = match self.attempt(invocation).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !self.should_retry(invocation, &error) {
                return Err(error);
            }

            let pause = self.retry_pause(invocation.attempt);
            let remaining = invocation.deadline.saturating_duration_since(Instant::now());
            if remaining <= pause {
                return Err(GridError::Timeout(format!("last error: {}", error)));
            }

            tracing::debug!(
                attempt = invocation.attempt,
                pause = ?pause,
                error = %error,
                "retrying invocation"
            );
            invocation.state = InvocationState::Retrying;
            invocation.last_error = Some(error);
            tokio::time::sleep(pause).await;
        }
    }

    async fn attempt(&self, invocation: &mut Invocation) -> Result<ClientMessage> {
        let connection = self.manager.select(&invocation.target)?;
        invocation.connection = Some(Arc::clone(&connection));

        let receiver = connection.send(invocation.message.clone()).await?;
        invocation.state = InvocationState::Sent;

        let response = receiver.await.map_err(|_| {
            GridError::ConnectionClosed(
                connection
                    .close_reason()
                    .unwrap_or("connection dropped the request")
                    .to_string(),
            )
        })??;
        invocation.connection = None;

        if is_error_response(&response) {
            return Err(GridError::Server(decode_error_response(&response)?));
        }
        Ok(response)
    }

    fn should_retry(&self, invocation: &Invocation, error: &GridError) -> bool {
        if self.shutdown.is_cancelled() || self.manager.is_shutdown() {
            return false;
        }
        if matches!(invocation.target, InvocationTarget::Connection(_)) {
            return false;
        }

        match error {
            GridError::Routing(_) => self.manager.routing_is_retryable(),
            // A request lost in flight may have been executed; only resend it
            // if it is idempotent or the caller allowed redoing it.
            e if e.is_connection_loss() && invocation.state == InvocationState::Sent => {
                invocation.message.is_retryable() || self.config.redo_operation()
            }
            e => e.is_retryable(),
        }
    }

    /// `retry_pause * 2^(attempt - 1)`, capped at the max retry pause.
    fn retry_pause(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config
            .retry_pause()
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_retry_pause())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterService;
    use crate::config::{ClientConfig, ReconnectMode};
    use crate::connection::{default_load_balancer, StaticAddressDiscovery, TcpConnector};
    use crate::listener::EventDispatcher;

    fn service_with(config: ClientConfig) -> Arc<InvocationService> {
        let config = Arc::new(config);
        let manager = ConnectionManager::new(
            Arc::clone(&config),
            Arc::new(TcpConnector::new()),
            Arc::new(StaticAddressDiscovery::new(config.network().addresses().to_vec())),
            default_load_balancer(),
            EventDispatcher::new(config.events()),
            Arc::new(ClusterService::new()),
        );
        InvocationService::new(config.invocation().clone(), manager)
    }

    #[tokio::test]
    async fn test_retry_pause_is_capped_and_non_decreasing() {
        let config = ClientConfig::builder()
            .invocation(|i| {
                i.retry_pause(Duration::from_millis(100))
                    .max_retry_pause(Duration::from_millis(500))
            })
            .build()
            .unwrap();
        let service = service_with(config);

        let pauses: Vec<_> = (1..=6).map(|attempt| service.retry_pause(attempt)).collect();
        assert_eq!(pauses[0], Duration::from_millis(100));
        assert_eq!(pauses[1], Duration::from_millis(200));
        assert_eq!(pauses[2], Duration::from_millis(400));
        assert!(pauses[3..].iter().all(|p| *p == Duration::from_millis(500)));
        assert_eq!(service.retry_pause(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_offline_client_fails_fast_without_reconnect() {
        let config = ClientConfig::builder()
            .network(|n| n.reconnect_mode(ReconnectMode::Off))
            .build()
            .unwrap();
        let service = service_with(config);

        let result = service
            .invoke_with_timeout(ClientMessage::new_request(1, -1), InvocationTarget::Any, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(GridError::Routing(msg)) if msg == "client offline"));
    }

    #[tokio::test]
    async fn test_offline_client_retries_until_deadline_with_reconnect() {
        let config = ClientConfig::builder()
            .invocation(|i| i.retry_pause(Duration::from_millis(5)))
            .build()
            .unwrap();
        let service = service_with(config);

        let result = service
            .invoke_with_timeout(ClientMessage::new_request(1, -1), InvocationTarget::Any, Duration::from_millis(100))
            .await;
        match result {
            Err(GridError::Timeout(msg)) => assert!(msg.contains("no connection to the cluster"), "{}", msg),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_completes_with_cancelled() {
        let config = ClientConfig::builder()
            .invocation(|i| i.retry_pause(Duration::from_millis(50)))
            .build()
            .unwrap();
        let service = service_with(config);

        let future = service.invoke(ClientMessage::new_request(1, -1), InvocationTarget::Any);
        future.cancel();
        assert!(matches!(future.await, Err(GridError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_shutdown_fails_new_and_running_invocations() {
        let config = ClientConfig::builder()
            .invocation(|i| i.retry_pause(Duration::from_millis(50)))
            .build()
            .unwrap();
        let service = service_with(config);

        let running = service.invoke(ClientMessage::new_request(1, -1), InvocationTarget::Any);
        tokio::task::yield_now().await;
        service.shutdown();
        assert!(matches!(running.await, Err(GridError::ClientNotActive(_))));

        let rejected = service.invoke(ClientMessage::new_request(1, -1), InvocationTarget::Any);
        assert!(matches!(rejected.await, Err(GridError::ClientNotActive(_))));
    }

    #[tokio::test]
    async fn test_correlation_ids_are_unique() {
        let config = ClientConfig::builder()
            .invocation(|i| i.max_concurrent(2))
            .build()
            .unwrap();
        let service = service_with(config);

        let futures: Vec<_> = (0..10)
            .map(|_| service.invoke(ClientMessage::new_request(1, -1), InvocationTarget::Any))
            .collect();
        let mut ids: Vec<_> = futures.iter().map(InvocationFuture::correlation_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        service.shutdown();
    }
}
