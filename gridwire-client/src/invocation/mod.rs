//! Request invocation with target selection and retry.

mod service;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use gridwire_core::{ClientMessage, GridError, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::ConnectionId;

pub use service::InvocationService;

/// Where an invocation should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationTarget {
    /// Any member; picked by the load balancer in smart routing mode.
    Any,
    /// The owner of a partition, or any member while the owner is unknown.
    Partition(i32),
    /// A specific member.
    Member(Uuid),
    /// A specific connection. Never retried elsewhere.
    Connection(ConnectionId),
}

impl fmt::Display for InvocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Partition(id) => write!(f, "partition {}", id),
            Self::Member(uuid) => write!(f, "member {}", uuid),
            Self::Connection(id) => write!(f, "{}", id),
        }
    }
}

/// Progress of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Submitted but not yet written to a connection.
    Created,
    /// Written to a connection, awaiting the response.
    Sent,
    /// Failed with a retryable error, waiting to be sent again.
    Retrying,
    /// Completed with a response.
    Completed,
    /// Completed with an error.
    Failed,
    /// The invocation deadline passed.
    TimedOut,
    /// Cancelled by the caller.
    Cancelled,
}

/// Handle to the eventual response of an invocation.
///
/// Awaiting the handle yields the response message, or the single error the
/// invocation failed with. Dropping the handle does not cancel the request;
/// call [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct InvocationFuture {
    correlation_id: i64,
    receiver: oneshot::Receiver<Result<ClientMessage>>,
    cancel: CancellationToken,
}

impl InvocationFuture {
    pub(crate) fn new(
        correlation_id: i64,
        receiver: oneshot::Receiver<Result<ClientMessage>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            correlation_id,
            receiver,
            cancel,
        }
    }

    /// Returns the correlation id of the request.
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Cancels the invocation. The handle then resolves to
    /// [`GridError::Cancelled`] unless the response already arrived.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Future for InvocationFuture {
    type Output = Result<ClientMessage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(GridError::ClientNotActive(
                    "invocation was abandoned by the client".to_string(),
                ))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_future_resolves_with_sent_result() {
        let (tx, rx) = oneshot::channel();
        let future = InvocationFuture::new(7, rx, CancellationToken::new());
        assert_eq!(future.correlation_id(), 7);
        tx.send(Err(GridError::Timeout("late".to_string()))).unwrap();
        assert!(matches!(future.await, Err(GridError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_abandoned_future_reports_client_not_active() {
        let (tx, rx) = oneshot::channel::<Result<ClientMessage>>();
        drop(tx);
        let future = InvocationFuture::new(1, rx, CancellationToken::new());
        assert!(matches!(future.await, Err(GridError::ClientNotActive(_))));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(InvocationTarget::Any.to_string(), "any");
        assert_eq!(InvocationTarget::Partition(3).to_string(), "partition 3");
    }
}
