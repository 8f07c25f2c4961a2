//! Single connection to a cluster member.
//!
//! A connection owns two tasks: a writer that drains an outbound queue onto
//! the socket, so the frames of one message are never interleaved with
//! another's, and a reader that reassembles messages and routes them by
//! correlation id. Responses complete the pending entry registered by
//! [`Connection::send`]; events go to the [`EventDispatcher`] without
//! blocking the read loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use gridwire_core::protocol::{split_message, FragmentAssembler, PROTOCOL_PREAMBLE};
use gridwire_core::{ClientMessage, ClientMessageCodec, GridError, Result};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connector::BoxedStream;
use crate::listener::EventDispatcher;

const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Shared collaborators handed to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Receives event messages.
    pub dispatcher: Arc<EventDispatcher>,
    /// Notified with the connection id once the connection closes.
    pub closed: mpsc::UnboundedSender<ConnectionId>,
    /// Outbound fragmentation threshold.
    pub max_frame_size: Option<usize>,
    /// Source of fragment ids, shared by all connections of a client.
    pub fragment_ids: Arc<AtomicI64>,
}

type Pending = oneshot::Sender<Result<ClientMessage>>;

/// A live, multiplexed connection to one member.
pub struct Connection {
    id: ConnectionId,
    address: SocketAddr,
    member_uuid: OnceLock<Uuid>,
    alive: AtomicBool,
    close_reason: OnceLock<String>,
    pending: DashMap<i64, Pending>,
    outbound: mpsc::Sender<ClientMessage>,
    shutdown: CancellationToken,
    closed: mpsc::UnboundedSender<ConnectionId>,
    created_at: Instant,
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("member_uuid", &self.member_uuid.get())
            .field("alive", &self.is_alive())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Connection {
    /// Writes the protocol preamble to `stream` and starts the reader and
    /// writer tasks.
    pub async fn open(
        mut stream: BoxedStream,
        address: SocketAddr,
        context: ConnectionContext,
    ) -> Result<Arc<Self>> {
        stream.write_all(PROTOCOL_PREAMBLE).await.map_err(|e| {
            GridError::Connection(format!("failed to write preamble to {}: {}", address, e))
        })?;
        stream.flush().await?;

        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            address,
            member_uuid: OnceLock::new(),
            alive: AtomicBool::new(true),
            close_reason: OnceLock::new(),
            pending: DashMap::new(),
            outbound,
            shutdown: CancellationToken::new(),
            closed: context.closed,
            created_at: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
        });

        tokio::spawn(write_loop(
            Arc::clone(&connection),
            writer,
            outbound_rx,
            context.max_frame_size,
            context.fragment_ids,
        ));
        tokio::spawn(read_loop(Arc::clone(&connection), reader, context.dispatcher));

        tracing::debug!(connection = %connection.id, address = %address, "connection opened");
        Ok(connection)
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address of this connection.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the uuid of the member behind this connection, once
    /// authenticated.
    pub fn member_uuid(&self) -> Option<Uuid> {
        self.member_uuid.get().copied()
    }

    pub(crate) fn set_member_uuid(&self, uuid: Uuid) {
        let _ = self.member_uuid.set(uuid);
    }

    /// Returns whether the connection is still usable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns why the connection was closed.
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.get().map(String::as_str)
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the time since a message was last read.
    pub fn last_read_elapsed(&self) -> Duration {
        self.elapsed_since(&self.last_read_ms)
    }

    /// Returns the time since a message was last written.
    pub fn last_write_elapsed(&self) -> Duration {
        self.elapsed_since(&self.last_write_ms)
    }

    fn elapsed_since(&self, mark: &AtomicU64) -> Duration {
        let now = self.created_at.elapsed();
        now.saturating_sub(Duration::from_millis(mark.load(Ordering::Relaxed)))
    }

    fn touch(&self, mark: &AtomicU64) {
        mark.store(self.created_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn closed_error(&self) -> GridError {
        GridError::ConnectionClosed(
            self.close_reason()
                .unwrap_or("connection is not active")
                .to_string(),
        )
    }

    /// Queues `message` for writing and returns the receiver its response
    /// will complete.
    ///
    /// The message must already carry its correlation id. The pending entry
    /// is registered before the message is queued, so a response can never
    /// arrive unmatched.
    pub async fn send(&self, message: ClientMessage) -> Result<oneshot::Receiver<Result<ClientMessage>>> {
        let correlation_id = message
            .correlation_id()
            .ok_or_else(|| GridError::Protocol("request without a header".to_string()))?;

        if !self.is_alive() {
            return Err(self.closed_error());
        }

        let (tx, rx) = oneshot::channel();
        if self.pending.insert(correlation_id, tx).is_some() {
            tracing::warn!(
                connection = %self.id,
                correlation_id = correlation_id,
                "correlation id reused while in flight"
            );
        }

        // close() may have drained the map between the check and the insert.
        if !self.is_alive() {
            self.pending.remove(&correlation_id);
            return Err(self.closed_error());
        }

        if self.outbound.send(message).await.is_err() {
            self.pending.remove(&correlation_id);
            return Err(self.closed_error());
        }

        Ok(rx)
    }

    /// Sends `message` and waits for its response.
    pub async fn invoke(&self, message: ClientMessage, timeout: Duration) -> Result<ClientMessage> {
        let correlation_id = message.correlation_id().unwrap_or_default();
        let rx = self.send(message).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                self.deregister(correlation_id);
                Err(GridError::Timeout(format!(
                    "no response for correlation id {} on {} within {:?}",
                    correlation_id, self.id, timeout
                )))
            }
        }
    }

    /// Forgets the pending entry for `correlation_id` without completing it.
    pub fn deregister(&self, correlation_id: i64) -> bool {
        self.pending.remove(&correlation_id).is_some()
    }

    /// Closes the connection, failing every pending request with a
    /// connection-closed error carrying `reason`.
    ///
    /// Only the first call has an effect.
    pub fn close(&self, reason: impl Into<String>) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        let reason = reason.into();
        let _ = self.close_reason.set(reason.clone());
        self.shutdown.cancel();

        let correlation_ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0usize;
        for correlation_id in correlation_ids {
            if let Some((_, tx)) = self.pending.remove(&correlation_id) {
                let _ = tx.send(Err(GridError::ConnectionClosed(reason.clone())));
                failed += 1;
            }
        }

        tracing::info!(
            connection = %self.id,
            address = %self.address,
            reason = %reason,
            failed_requests = failed,
            "connection closed"
        );
        let _ = self.closed.send(self.id);
    }

    fn complete(&self, message: ClientMessage) {
        let Some(correlation_id) = message.correlation_id() else {
            tracing::warn!(connection = %self.id, "dropping message without a header");
            return;
        };

        match self.pending.remove(&correlation_id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(message));
            }
            None => tracing::debug!(
                connection = %self.id,
                correlation_id = correlation_id,
                "response for unknown correlation id"
            ),
        }
    }
}

async fn write_loop(
    connection: Arc<Connection>,
    writer: WriteHalf<BoxedStream>,
    mut outbound: mpsc::Receiver<ClientMessage>,
    max_frame_size: Option<usize>,
    fragment_ids: Arc<AtomicI64>,
) {
    let mut framed = FramedWrite::new(writer, ClientMessageCodec::new());

    loop {
        let message = tokio::select! {
            _ = connection.shutdown.cancelled() => break,
            next = outbound.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        let parts = match max_frame_size {
            Some(max) if message.wire_size() > max => {
                split_message(message, max, fragment_ids.fetch_add(1, Ordering::Relaxed))
            }
            _ => vec![message],
        };

        for part in parts {
            if let Err(e) = framed.feed(part).await {
                connection.close(format!("write failed: {}", e));
                return;
            }
        }
        if let Err(e) = framed.flush().await {
            connection.close(format!("write failed: {}", e));
            return;
        }
        connection.touch(&connection.last_write_ms);
    }

    let _ = framed.get_mut().shutdown().await;
}

async fn read_loop(
    connection: Arc<Connection>,
    reader: ReadHalf<BoxedStream>,
    dispatcher: Arc<EventDispatcher>,
) {
    let mut framed = FramedRead::new(reader, ClientMessageCodec::new());
    let mut assembler = FragmentAssembler::new();

    loop {
        let next = tokio::select! {
            _ = connection.shutdown.cancelled() => return,
            next = framed.next() => next,
        };

        let wire = match next {
            Some(Ok(wire)) => wire,
            Some(Err(e)) => {
                connection.close(format!("read failed: {}", e));
                return;
            }
            None => {
                connection.close("connection closed by peer");
                return;
            }
        };

        connection.touch(&connection.last_read_ms);

        let message = match assembler.accept(wire) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                connection.close(format!("malformed fragment: {}", e));
                return;
            }
        };

        if message.is_backup_event() {
            tracing::trace!(connection = %connection.id, "ignoring backup event");
        } else if message.is_event() {
            dispatcher.dispatch(message);
        } else {
            connection.complete(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfig;
    use gridwire_core::protocol::{messages::ping, FragmentAssembler as Reassembler};
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio_util::codec::Framed;

    async fn open_pair(
        max_frame_size: Option<usize>,
    ) -> (Arc<Connection>, Framed<DuplexStream, ClientMessageCodec>, mpsc::UnboundedReceiver<ConnectionId>) {
        let (client, mut server) = duplex(64 * 1024);
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let context = ConnectionContext {
            dispatcher: EventDispatcher::new(&EventConfig::default()),
            closed: closed_tx,
            max_frame_size,
            fragment_ids: Arc::new(AtomicI64::new(0)),
        };
        let connection = Connection::open(Box::new(client), "127.0.0.1:5701".parse().unwrap(), context)
            .await
            .unwrap();

        let mut preamble = [0u8; 3];
        server.read_exact(&mut preamble).await.unwrap();
        assert_eq!(&preamble, PROTOCOL_PREAMBLE);

        (connection, Framed::new(server, ClientMessageCodec::new()), closed_rx)
    }

    fn ping_with(correlation_id: i64) -> ClientMessage {
        let mut msg = ping::encode_request();
        msg.set_correlation_id(correlation_id);
        msg
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), format!("conn-{}", id.value()));
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[tokio::test]
    async fn test_response_completes_matching_request() {
        let (connection, mut server, _closed) = open_pair(None).await;

        let rx_a = connection.send(ping_with(1)).await.unwrap();
        let rx_b = connection.send(ping_with(2)).await.unwrap();
        assert_eq!(connection.pending_count(), 2);

        let first = server.next().await.unwrap().unwrap();
        assert_eq!(first.correlation_id(), Some(1));
        let second = server.next().await.unwrap().unwrap();
        assert_eq!(second.correlation_id(), Some(2));

        server.send(ping::encode_response(2)).await.unwrap();
        server.send(ping::encode_response(1)).await.unwrap();

        assert_eq!(rx_b.await.unwrap().unwrap().correlation_id(), Some(2));
        assert_eq!(rx_a.await.unwrap().unwrap().correlation_id(), Some(1));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_all_pending_once() {
        let (connection, _server, mut closed) = open_pair(None).await;

        let receivers: Vec<_> = futures::future::join_all((1..=5).map(|i| connection.send(ping_with(i))))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        connection.close("member left");
        connection.close("second close is ignored");

        for rx in receivers {
            match rx.await.unwrap() {
                Err(GridError::ConnectionClosed(reason)) => assert_eq!(reason, "member left"),
                other => panic!("expected connection closed, got {:?}", other),
            }
        }
        assert_eq!(connection.pending_count(), 0);
        assert_eq!(closed.recv().await, Some(connection.id()));
        assert!(closed.try_recv().is_err());
        assert!(matches!(
            connection.send(ping_with(9)).await,
            Err(GridError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_disconnect_closes_connection() {
        let (connection, server, mut closed) = open_pair(None).await;
        let rx = connection.send(ping_with(3)).await.unwrap();
        drop(server);

        assert!(matches!(rx.await.unwrap(), Err(GridError::ConnectionClosed(_))));
        assert_eq!(closed.recv().await, Some(connection.id()));
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn test_invoke_timeout_removes_pending_entry() {
        let (connection, _server, _closed) = open_pair(None).await;
        let result = connection.invoke(ping_with(4), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(GridError::Timeout(_))));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_large_messages_are_fragmented() {
        let (connection, mut server, _closed) = open_pair(Some(64)).await;

        let mut request = ping_with(7);
        for i in 0..8u8 {
            request.add_frame(gridwire_core::Frame::from_slice(&[i; 20]));
        }
        let expected = {
            let mut m = request.clone();
            m.finalize();
            m
        };
        let _rx = connection.send(request).await.unwrap();

        let mut assembler = Reassembler::new();
        let mut fragments = 0;
        let reassembled = loop {
            let wire = server.next().await.unwrap().unwrap();
            fragments += 1;
            if let Some(message) = assembler.accept(wire).unwrap() {
                break message;
            }
        };
        assert!(fragments > 1);
        assert_eq!(reassembled, expected);
    }
}
