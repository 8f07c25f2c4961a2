//! Common test utilities for integration tests.
//!
//! [`MockCluster`] runs in-process members that speak the frame protocol over
//! TCP: they authenticate clients, push member and partition views, answer
//! pings and distributed object listener requests, and echo every other
//! request back with the index of the member that handled it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gridwire_client::core::protocol::codecs::{ErrorHolder, StringCodec};
use gridwire_client::core::protocol::messages::authentication::{
    self, AuthenticationResponse, AuthenticationStatus,
};
use gridwire_client::core::protocol::messages::distributed_object::{
    self, DistributedObjectEvent, DistributedObjectEventType,
};
use gridwire_client::core::protocol::messages::{cluster_view, error, ping};
use gridwire_client::core::protocol::{
    error_codes, response_initial_frame, ClientMessage, ClientMessageCodec,
    CLIENT_ADD_CLUSTER_VIEW_LISTENER, CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER,
    CLIENT_AUTHENTICATION, CLIENT_AUTHENTICATION_CUSTOM, CLIENT_PING,
    CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER, PROTOCOL_PREAMBLE,
};
use gridwire_client::core::{Address, MemberInfo};
use gridwire_client::{ClientConfig, ClientConfigBuilder, ReconnectMode};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Request type the mock members echo back.
pub const ECHO_REQUEST: i32 = 0x7F0100;
/// Response type of [`ECHO_REQUEST`].
pub const ECHO_RESPONSE: i32 = ECHO_REQUEST + 1;
/// Request type the mock members answer with a non-retryable error.
pub const FAILING_REQUEST: i32 = 0x7F0200;
/// Request type the mock members answer with `WRONG_TARGET` while
/// [`MockMember::fail_retryable`] failures remain, then echo.
pub const RETRYABLE_REQUEST: i32 = 0x7F0300;

pub const PARTITION_COUNT: i32 = 6;

type Outbound = mpsc::UnboundedSender<ClientMessage>;

struct Registration {
    member: usize,
    id: Uuid,
    correlation_id: i64,
    sender: Outbound,
}

struct Shared {
    cluster_id: Uuid,
    view: Mutex<(i32, Vec<MemberInfo>)>,
    view_listeners: Mutex<Vec<Registration>>,
    object_listeners: Mutex<Vec<Registration>>,
    adds: AtomicUsize,
    removes: AtomicUsize,
    pings: AtomicUsize,
}

impl Shared {
    fn partition_table(members: &[MemberInfo]) -> Vec<(Uuid, Vec<i32>)> {
        members
            .iter()
            .enumerate()
            .map(|(index, member)| {
                let owned = (0..PARTITION_COUNT)
                    .filter(|p| *p as usize % members.len() == index)
                    .collect();
                (member.uuid(), owned)
            })
            .collect()
    }

    fn send_views(&self, sender: &Outbound, correlation_id: i64) {
        let (version, members) = self.view.lock().unwrap().clone();
        let _ = sender.send(cluster_view::encode_members_view_event(
            correlation_id,
            version,
            &members,
        ));
        let _ = sender.send(cluster_view::encode_partitions_view_event(
            correlation_id,
            version,
            &Self::partition_table(&members),
        ));
    }

    fn forget(&self, sender: &Outbound) {
        self.view_listeners
            .lock()
            .unwrap()
            .retain(|r| !r.sender.same_channel(sender));
        self.object_listeners
            .lock()
            .unwrap()
            .retain(|r| !r.sender.same_channel(sender));
    }
}

/// One mock member.
pub struct MockMember {
    index: usize,
    info: MemberInfo,
    address: SocketAddr,
    shared: Arc<Shared>,
    stopped: CancellationToken,
    connections: Mutex<CancellationToken>,
    silent: AtomicBool,
    handled: AtomicUsize,
    retryable_failures: AtomicUsize,
    accepted: AtomicUsize,
}

impl MockMember {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn uuid(&self) -> Uuid {
        self.info.uuid()
    }

    /// Number of echo requests this member handled.
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    /// Number of connections this member accepted.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Answers the next `count` retryable requests with `WRONG_TARGET`.
    pub fn fail_retryable(&self, count: usize) {
        self.retryable_failures.store(count, Ordering::SeqCst);
    }

    /// Stops answering echo requests while still reading them.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Closes every open connection; new connections are still accepted.
    pub fn drop_connections(&self) {
        let mut current = self.connections.lock().unwrap();
        current.cancel();
        *current = CancellationToken::new();
    }

    /// Closes every connection and stops accepting new ones.
    pub fn stop(&self) {
        self.stopped.cancel();
        self.drop_connections();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.stopped.cancelled() => break,
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { break };
                    self.accepted.fetch_add(1, Ordering::SeqCst);
                    let closed = self.connections.lock().unwrap().clone();
                    tokio::spawn(Arc::clone(&self).serve(stream, closed));
                }
            }
        }
    }

    async fn serve(self: Arc<Self>, mut stream: TcpStream, closed: CancellationToken) {
        let mut preamble = [0u8; 3];
        if stream.read_exact(&mut preamble).await.is_err() || &preamble != PROTOCOL_PREAMBLE {
            return;
        }

        let (mut sink, mut source) =
            Framed::new(stream, ClientMessageCodec::new()).split::<ClientMessage>();
        let (sender, mut outbound) = mpsc::unbounded_channel::<ClientMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                next = source.next() => match next {
                    Some(Ok(request)) => self.handle(request, &sender),
                    _ => break,
                },
            }
        }

        self.shared.forget(&sender);
        writer.abort();
    }

    fn handle(&self, request: ClientMessage, sender: &Outbound) {
        let (Some(correlation_id), Some(message_type)) =
            (request.correlation_id(), request.message_type())
        else {
            return;
        };

        match message_type {
            CLIENT_AUTHENTICATION | CLIENT_AUTHENTICATION_CUSTOM => {
                let response = AuthenticationResponse {
                    status: AuthenticationStatus::Authenticated,
                    address: Some(self.info.address().clone()),
                    member_uuid: Some(self.info.uuid()),
                    serialization_version: 1,
                    server_version: "5.3.0".to_string(),
                    partition_count: PARTITION_COUNT,
                    cluster_id: Some(self.shared.cluster_id),
                    failover_supported: false,
                };
                let _ = sender.send(authentication::encode_response(
                    message_type,
                    correlation_id,
                    &response,
                ));
            }
            CLIENT_ADD_CLUSTER_VIEW_LISTENER => {
                let _ = sender.send(cluster_view::encode_response(correlation_id));
                self.shared.send_views(sender, correlation_id);
                self.shared.view_listeners.lock().unwrap().push(Registration {
                    member: self.index,
                    id: Uuid::new_v4(),
                    correlation_id,
                    sender: sender.clone(),
                });
            }
            CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER => {
                self.shared.adds.fetch_add(1, Ordering::SeqCst);
                let id = Uuid::new_v4();
                self.shared.object_listeners.lock().unwrap().push(Registration {
                    member: self.index,
                    id,
                    correlation_id,
                    sender: sender.clone(),
                });
                let _ = sender.send(distributed_object::encode_add_response(correlation_id, id));
            }
            CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER => {
                self.shared.removes.fetch_add(1, Ordering::SeqCst);
                let removed = match distributed_object::decode_remove_request(&request) {
                    Ok(id) => {
                        let mut listeners = self.shared.object_listeners.lock().unwrap();
                        let before = listeners.len();
                        listeners.retain(|r| r.id != id);
                        listeners.len() != before
                    }
                    Err(_) => false,
                };
                let _ = sender.send(distributed_object::encode_remove_response(
                    correlation_id,
                    removed,
                ));
            }
            CLIENT_PING => {
                self.shared.pings.fetch_add(1, Ordering::SeqCst);
                let _ = sender.send(ping::encode_response(correlation_id));
            }
            FAILING_REQUEST => {
                let holder = ErrorHolder {
                    error_code: error_codes::ILLEGAL_ARGUMENT,
                    class_name: "java.lang.IllegalArgumentException".to_string(),
                    message: Some("bad argument".to_string()),
                    stack_trace: Vec::new(),
                };
                let _ = sender.send(error::encode_error_response(correlation_id, &[holder]));
            }
            RETRYABLE_REQUEST
                if self
                    .retryable_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok() =>
            {
                self.handled.fetch_add(1, Ordering::SeqCst);
                let holder = ErrorHolder {
                    error_code: error_codes::WRONG_TARGET,
                    class_name: "com.example.WrongTargetException".to_string(),
                    message: Some("partition moved".to_string()),
                    stack_trace: Vec::new(),
                };
                let _ = sender.send(error::encode_error_response(correlation_id, &[holder]));
            }
            _ => {
                self.handled.fetch_add(1, Ordering::SeqCst);
                if self.silent.load(Ordering::SeqCst) {
                    return;
                }
                let mut response = ClientMessage::from_initial_frame(response_initial_frame(
                    message_type + 1,
                    correlation_id,
                    0,
                ));
                StringCodec::encode(&mut response, &self.index.to_string());
                let _ = sender.send(response);
            }
        }
    }
}

/// In-process cluster of mock members.
pub struct MockCluster {
    shared: Arc<Shared>,
    members: Vec<Arc<MockMember>>,
}

impl MockCluster {
    /// Starts `size` members on ephemeral localhost ports.
    pub async fn start(size: usize) -> Self {
        let mut listeners = Vec::with_capacity(size);
        let mut infos = Vec::with_capacity(size);
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            infos.push(MemberInfo::new(Uuid::new_v4(), Address::new("127.0.0.1", port)));
            listeners.push(listener);
        }

        let shared = Arc::new(Shared {
            cluster_id: Uuid::new_v4(),
            view: Mutex::new((1, infos.clone())),
            view_listeners: Mutex::new(Vec::new()),
            object_listeners: Mutex::new(Vec::new()),
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
        });

        let mut members = Vec::with_capacity(size);
        for (index, (listener, info)) in listeners.into_iter().zip(infos).enumerate() {
            let member = Arc::new(MockMember {
                index,
                address: listener.local_addr().unwrap(),
                info,
                shared: Arc::clone(&shared),
                stopped: CancellationToken::new(),
                connections: Mutex::new(CancellationToken::new()),
                silent: AtomicBool::new(false),
                handled: AtomicUsize::new(0),
                retryable_failures: AtomicUsize::new(0),
                accepted: AtomicUsize::new(0),
            });
            tokio::spawn(Arc::clone(&member).accept_loop(listener));
            members.push(member);
        }

        Self { shared, members }
    }

    pub fn member(&self, index: usize) -> &Arc<MockMember> {
        &self.members[index]
    }

    pub fn cluster_id(&self) -> Uuid {
        self.shared.cluster_id
    }

    /// Index of the member owning `partition_id` in the initial view.
    pub fn owner_of(&self, partition_id: i32) -> usize {
        partition_id as usize % self.members.len()
    }

    /// Number of distributed object listener add requests received.
    pub fn listener_adds(&self) -> usize {
        self.shared.adds.load(Ordering::SeqCst)
    }

    /// Number of distributed object listener remove requests received.
    pub fn listener_removes(&self) -> usize {
        self.shared.removes.load(Ordering::SeqCst)
    }

    /// Number of live distributed object registrations.
    pub fn live_object_listeners(&self) -> usize {
        self.shared.object_listeners.lock().unwrap().len()
    }

    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Pushes a distributed object event to every live registration.
    pub fn publish_object_event(&self, name: &str, event_type: DistributedObjectEventType) {
        let listeners = self.shared.object_listeners.lock().unwrap();
        for registration in listeners.iter() {
            let event = DistributedObjectEvent {
                name: name.to_string(),
                service_name: "map".to_string(),
                event_type,
                source: Some(self.members[registration.member].uuid()),
            };
            let _ = registration
                .sender
                .send(distributed_object::encode_event(registration.correlation_id, &event));
        }
    }

    /// Removes a member from the view, pushes the new view to the clients
    /// and stops the member.
    pub fn remove_member(&self, index: usize) {
        let removed = self.members[index].uuid();
        {
            let mut view = self.shared.view.lock().unwrap();
            view.0 += 1;
            view.1.retain(|m| m.uuid() != removed);
        }
        for registration in self.shared.view_listeners.lock().unwrap().iter() {
            if registration.member != index {
                self.shared
                    .send_views(&registration.sender, registration.correlation_id);
            }
        }
        self.members[index].stop();
    }

    /// A client configuration pointing at the first member with short
    /// timeouts.
    pub fn config_builder(&self) -> ClientConfigBuilder {
        ClientConfig::builder()
            .cluster_name("dev")
            .add_address(self.members[0].address())
            .network(|n| {
                n.connection_timeout(Duration::from_secs(2))
                    .reconnect_mode(ReconnectMode::On)
            })
            .retry(|r| {
                r.initial_backoff(Duration::from_millis(20))
                    .max_backoff(Duration::from_millis(200))
                    .cluster_connect_timeout(Duration::from_secs(5))
            })
            .invocation(|i| {
                i.timeout(Duration::from_secs(5))
                    .retry_pause(Duration::from_millis(20))
                    .max_retry_pause(Duration::from_millis(200))
            })
    }

    pub fn config(&self) -> ClientConfig {
        self.config_builder().build().expect("failed to build config")
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        for member in &self.members {
            member.stop();
        }
    }
}

/// Decodes the index of the member that answered an echo request.
pub fn responder(response: &ClientMessage) -> usize {
    assert_eq!(response.message_type(), Some(ECHO_RESPONSE));
    let mut body = response.body();
    StringCodec::decode(&mut body)
        .expect("echo response without member index")
        .parse()
        .expect("member index is not a number")
}

pub fn echo_request() -> ClientMessage {
    ClientMessage::new_request(ECHO_REQUEST, -1)
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
