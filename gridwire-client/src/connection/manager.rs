//! Connection pool management and lifecycle handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use gridwire_core::protocol::messages::authentication::{
    self, AuthCredentials, AuthenticationRequest, AuthenticationResponse, AuthenticationStatus,
};
use gridwire_core::protocol::messages::ping;
use gridwire_core::{GridError, Result};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout, Instant};
use tracing::instrument;
use uuid::Uuid;

use super::connection::{Connection, ConnectionContext, ConnectionId};
use super::connector::Connector;
use super::discovery::ClusterDiscovery;
use super::load_balancer::LoadBalancer;
use crate::cluster::ClusterService;
use crate::config::{ClientConfig, Credentials, ReconnectMode};
use crate::invocation::InvocationTarget;
use crate::listener::{EventDispatcher, LifecycleEvent, MemberEvent, MemberEventType};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const CLIENT_TYPE: &str = "RST";
const SERIALIZATION_VERSION: u8 = 1;

/// Events emitted during connection lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// An authenticated connection to a member was opened.
    Opened {
        /// The connection identifier.
        id: ConnectionId,
        /// The address of the member.
        address: SocketAddr,
        /// The member's uuid.
        member: Uuid,
    },
    /// A connection was closed.
    Closed {
        /// The connection identifier.
        id: ConnectionId,
        /// The address of the member.
        address: SocketAddr,
        /// Why the connection was closed.
        reason: String,
    },
    /// A reconnect round failed and another one is scheduled.
    ReconnectAttempt {
        /// The attempt that just failed.
        attempt: u32,
        /// The delay before the next attempt.
        next_delay: Duration,
    },
    /// The cluster could not be reached within the cluster connect timeout.
    ReconnectFailed {
        /// The error from the last attempt.
        error: String,
    },
}

/// Connection state of the client as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No connection has been made yet.
    Initial,
    /// At least one member connection is open.
    ConnectedToCluster,
    /// Every member connection was lost.
    Disconnected,
    /// The client was shut down.
    Shutdown,
}

/// Observes connections being added to and removed from the pool.
///
/// Callbacks run synchronously on the manager's bookkeeping path and must not
/// block; spawn a task for anything that talks to the cluster.
pub trait ConnectionListener: Send + Sync {
    /// Called after an authenticated connection joined the pool.
    fn connection_added(&self, connection: &Arc<Connection>);

    /// Called after a connection left the pool.
    fn connection_removed(&self, connection: &Arc<Connection>);
}

/// Calculates the next backoff duration with jitter applied.
pub(crate) fn calculate_backoff_with_jitter(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
) -> Duration {
    let base_backoff = current_backoff.as_secs_f64() * multiplier;

    let jitter_factor = if jitter > 0.0 {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    let jittered_backoff = base_backoff * jitter_factor;

    std::cmp::min(Duration::from_secs_f64(jittered_backoff), max_backoff)
}

/// Opens, authenticates, and tracks the connections to cluster members.
///
/// The manager keeps at most one connection per member. In smart routing
/// mode it connects to every member in the member table; otherwise it keeps
/// a single connection and lets that member route internally.
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    client_uuid: Uuid,
    connector: Arc<dyn Connector>,
    discovery: Arc<dyn ClusterDiscovery>,
    load_balancer: Arc<dyn LoadBalancer>,
    dispatcher: Arc<EventDispatcher>,
    cluster: Arc<ClusterService>,
    connections: DashMap<Uuid, Arc<Connection>>,
    connecting: DashMap<SocketAddr, Arc<tokio::sync::Mutex<()>>>,
    correlation_ids: AtomicI64,
    fragment_ids: Arc<AtomicI64>,
    closed_tx: mpsc::UnboundedSender<ConnectionId>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionId>>>,
    cluster_id: ArcSwapOption<Uuid>,
    state: watch::Sender<ClientState>,
    event_sender: broadcast::Sender<ConnectionEvent>,
    lifecycle_sender: broadcast::Sender<LifecycleEvent>,
    listeners: ArcSwap<Vec<Arc<dyn ConnectionListener>>>,
    shutdown: watch::Sender<bool>,
    reconnecting: AtomicBool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_uuid", &self.client_uuid)
            .field("connections", &self.connections.len())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager. Nothing is connected until [`start`](Self::start).
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        discovery: Arc<dyn ClusterDiscovery>,
        load_balancer: Arc<dyn LoadBalancer>,
        dispatcher: Arc<EventDispatcher>,
        cluster: Arc<ClusterService>,
    ) -> Arc<Self> {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ClientState::Initial);
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (lifecycle_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            client_uuid: Uuid::new_v4(),
            connector,
            discovery,
            load_balancer,
            dispatcher,
            cluster,
            connections: DashMap::new(),
            connecting: DashMap::new(),
            correlation_ids: AtomicI64::new(0),
            fragment_ids: Arc::new(AtomicI64::new(0)),
            closed_tx,
            closed_rx: Mutex::new(Some(closed_rx)),
            cluster_id: ArcSwapOption::empty(),
            state,
            event_sender,
            lifecycle_sender,
            listeners: ArcSwap::from_pointee(Vec::new()),
            shutdown,
            reconnecting: AtomicBool::new(false),
        })
    }

    /// Returns the uuid this client presents to the cluster.
    pub fn client_uuid(&self) -> Uuid {
        self.client_uuid
    }

    /// Returns the id of the cluster the client is connected to.
    pub fn cluster_id(&self) -> Option<Uuid> {
        self.cluster_id.load_full().map(|id| *id)
    }

    /// Returns the current client state.
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Watches client state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_sender.subscribe()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_sender.subscribe()
    }

    pub(crate) fn fire_lifecycle(&self, event: LifecycleEvent) {
        tracing::debug!(event = %event, "client lifecycle");
        let _ = self.lifecycle_sender.send(event);
    }

    /// Registers a listener for connections joining and leaving the pool.
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&listener));
            next
        });
    }

    /// Returns the next correlation id. Ids are unique for the lifetime of
    /// the client, across all connections.
    pub fn next_correlation_id(&self) -> i64 {
        self.correlation_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the open connections.
    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_alive())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the connection to `member`, if one is open.
    pub fn connection_for_member(&self, member: Uuid) -> Option<Arc<Connection>> {
        self.connections
            .get(&member)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|connection| connection.is_alive())
    }

    /// Returns the open connection with the given id.
    pub fn connection_by_id(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| entry.value().id() == id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|connection| connection.is_alive())
    }

    fn connection_for_address(&self, address: SocketAddr) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| entry.value().address() == address && entry.value().is_alive())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(GridError::ClientNotActive("client is shut down".to_string()));
        }
        Ok(())
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            dispatcher: Arc::clone(&self.dispatcher),
            closed: self.closed_tx.clone(),
            max_frame_size: self.config.network().max_frame_size(),
            fragment_ids: Arc::clone(&self.fragment_ids),
        }
    }

    /// Connects to the cluster and starts the background tasks.
    ///
    /// Returns once one member accepted the client and the initial member
    /// list arrived, or fails after the cluster connect timeout.
    #[instrument(name = "connection_manager.start", skip(self), fields(client = %self.client_uuid))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.ensure_active()?;
        let closed_rx = self
            .closed_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| GridError::Configuration("connection manager already started".to_string()))?;

        tokio::spawn(run_closed_notices(Arc::downgrade(self), closed_rx, self.shutdown.subscribe()));
        tokio::spawn(run_membership(
            Arc::downgrade(self),
            self.cluster.subscribe(),
            self.shutdown.subscribe(),
        ));

        self.connect_to_cluster().await?;

        if !self
            .cluster
            .wait_for_members(self.config.network().connection_timeout())
            .await
        {
            tracing::warn!("initial member list did not arrive, routing to any connection");
        }

        tokio::spawn(run_heartbeat(
            Arc::downgrade(self),
            self.config.network().heartbeat_interval(),
            self.config.network().heartbeat_timeout(),
            self.shutdown.subscribe(),
        ));
        Ok(())
    }

    /// Tries the discovered addresses and last known members in rounds with
    /// backoff until one accepts the client or the cluster connect timeout
    /// passes.
    async fn connect_to_cluster(self: &Arc<Self>) -> Result<Arc<Connection>> {
        let retry = self.config.retry();
        let deadline = Instant::now() + retry.cluster_connect_timeout();
        let mut backoff = retry.initial_backoff();
        let mut attempt = 0u32;
        let mut last_error = None;

        loop {
            self.ensure_active()?;
            attempt += 1;

            for address in self.candidate_addresses().await {
                match self.connect_to(address).await {
                    Ok(connection) => {
                        tracing::info!(attempt = attempt, address = %address, "connected to cluster");
                        return Ok(connection);
                    }
                    Err(e @ (GridError::Authentication(_) | GridError::ClientNotActive(_))) => return Err(e),
                    Err(e) => {
                        tracing::warn!(attempt = attempt, address = %address, error = %e, "connection attempt failed");
                        last_error = Some(e.to_string());
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let error = format!(
                    "unable to connect to the cluster within {:?}: {}",
                    retry.cluster_connect_timeout(),
                    last_error.unwrap_or_else(|| "no addresses to try".to_string())
                );
                tracing::error!(attempts = attempt, "cluster unreachable");
                return Err(GridError::Connection(error));
            }

            let delay = backoff.min(remaining);
            let _ = self.event_sender.send(ConnectionEvent::ReconnectAttempt {
                attempt,
                next_delay: delay,
            });
            if !self.sleep_unless_shutdown(delay).await {
                return Err(GridError::ClientNotActive("client is shut down".to_string()));
            }
            backoff = calculate_backoff_with_jitter(
                backoff,
                retry.multiplier(),
                retry.max_backoff(),
                retry.jitter(),
            );
        }
    }

    async fn candidate_addresses(&self) -> Vec<SocketAddr> {
        let mut addresses = match self.discovery.discover().await {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::warn!(error = %e, "address discovery failed");
                Vec::new()
            }
        };
        for member in self.cluster.members() {
            if let Some(address) = member.address().to_socket_addr() {
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }
        addresses
    }

    async fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown.changed() => false,
        }
    }

    /// Opens and authenticates a connection to `address`.
    ///
    /// Concurrent calls for the same address share one attempt; if the
    /// member is already connected the existing connection is returned.
    #[instrument(name = "connection_manager.connect", skip(self), fields(address = %address))]
    pub async fn connect_to(self: &Arc<Self>, address: SocketAddr) -> Result<Arc<Connection>> {
        self.ensure_active()?;
        if let Some(existing) = self.connection_for_address(address) {
            return Ok(existing);
        }

        let gate = Arc::clone(self.connecting.entry(address).or_default().value());
        let result = {
            let _guard = gate.lock().await;
            match self.connection_for_address(address) {
                Some(existing) => Ok(existing),
                None => self.open_connection(address).await,
            }
        };

        drop(gate);
        self.connecting.remove_if(&address, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    async fn open_connection(self: &Arc<Self>, address: SocketAddr) -> Result<Arc<Connection>> {
        self.ensure_active()?;

        let connect_timeout = self.config.network().connection_timeout();
        tracing::debug!(timeout = ?connect_timeout, "attempting connection");
        let stream = timeout(
            connect_timeout,
            self.connector.connect(address, self.config.network().socket()),
        )
        .await
        .map_err(|_| {
            GridError::Timeout(format!(
                "connection to {} timed out after {:?}",
                address, connect_timeout
            ))
        })??;

        let connection = Connection::open(stream, address, self.connection_context()).await?;
        let response = match self.authenticate(&connection).await {
            Ok(response) => response,
            Err(e) => {
                connection.close(format!("authentication failed: {}", e));
                return Err(e);
            }
        };

        self.register(connection, response)
    }

    async fn authenticate(&self, connection: &Connection) -> Result<AuthenticationResponse> {
        let credentials = match self.config.security().credentials() {
            Some(Credentials::UsernamePassword { username, password }) => AuthCredentials::UsernamePassword {
                username: Some(username.clone()),
                password: Some(password.clone()),
            },
            Some(Credentials::Token(token)) => AuthCredentials::Token(token.clone()),
            None => AuthCredentials::UsernamePassword {
                username: None,
                password: None,
            },
        };
        let request = AuthenticationRequest {
            cluster_name: self.config.cluster_name().to_string(),
            credentials,
            client_uuid: self.client_uuid,
            client_type: CLIENT_TYPE.to_string(),
            serialization_version: SERIALIZATION_VERSION,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            client_name: self
                .config
                .client_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("client_{}", self.client_uuid.simple())),
            labels: self.config.labels().to_vec(),
        };

        let mut message = authentication::encode_request(&request);
        message.set_correlation_id(self.next_correlation_id());
        let reply = connection
            .invoke(message, self.config.network().connection_timeout())
            .await?;
        let response = authentication::decode_response(&reply)?;

        match response.status {
            AuthenticationStatus::Authenticated => Ok(response),
            AuthenticationStatus::CredentialsFailed => Err(GridError::Authentication(
                "invalid credentials".to_string(),
            )),
            AuthenticationStatus::SerializationVersionMismatch => Err(GridError::Authentication(
                "serialization version mismatch".to_string(),
            )),
            AuthenticationStatus::NotAllowedInCluster => Err(GridError::Authentication(format!(
                "client is not allowed in cluster {}",
                self.config.cluster_name()
            ))),
        }
    }

    fn register(
        self: &Arc<Self>,
        connection: Arc<Connection>,
        response: AuthenticationResponse,
    ) -> Result<Arc<Connection>> {
        let Some(member_uuid) = response.member_uuid else {
            connection.close("authentication response without member uuid");
            return Err(GridError::Authentication(
                "authentication response without member uuid".to_string(),
            ));
        };

        let mut changed_cluster = false;
        if let Some(new_id) = response.cluster_id {
            let previous = self.cluster_id();
            if previous.is_some_and(|previous| previous != new_id) {
                if !self.connections.is_empty() {
                    let reason = format!("member {} belongs to another cluster {}", member_uuid, new_id);
                    connection.close(reason.clone());
                    return Err(GridError::Connection(reason));
                }
                tracing::warn!(
                    previous = ?previous,
                    cluster_id = %new_id,
                    "connected to a different cluster"
                );
                self.cluster.reset();
                changed_cluster = true;
            }
            self.cluster_id.store(Some(Arc::new(new_id)));
        }

        self.cluster.set_partition_count(response.partition_count);
        let known = self.cluster.snapshot().partition_count();
        if known > 0 && response.partition_count > 0 && known != response.partition_count {
            tracing::warn!(
                expected = known,
                reported = response.partition_count,
                "member reported a different partition count"
            );
        }

        connection.set_member_uuid(member_uuid);
        if let Some(existing) = self.connection_for_member(member_uuid) {
            connection.close("duplicate connection to member");
            return Ok(existing);
        }

        if self.is_shutdown() {
            connection.close("client is shutting down");
            return Err(GridError::ClientNotActive("client is shut down".to_string()));
        }
        self.connections.insert(member_uuid, Arc::clone(&connection));
        if !connection.is_alive() {
            let _ = self.connections.remove_if(&member_uuid, |_, c| c.id() == connection.id());
            return Err(GridError::ConnectionClosed(
                connection
                    .close_reason()
                    .unwrap_or("connection closed during authentication")
                    .to_string(),
            ));
        }

        let previous_state = self.state.send_replace(ClientState::ConnectedToCluster);
        let _ = self.event_sender.send(ConnectionEvent::Opened {
            id: connection.id(),
            address: connection.address(),
            member: member_uuid,
        });
        tracing::info!(
            connection = %connection.id(),
            member = %member_uuid,
            server_version = %response.server_version,
            "authenticated with cluster member"
        );

        if changed_cluster {
            self.fire_lifecycle(LifecycleEvent::ClientChangedCluster);
        }
        if previous_state != ClientState::ConnectedToCluster {
            self.fire_lifecycle(LifecycleEvent::ClientConnected);
        }
        for listener in self.listeners.load().iter() {
            listener.connection_added(&connection);
        }

        Ok(connection)
    }

    fn connect_in_background(self: &Arc<Self>, address: SocketAddr) {
        if self.is_shutdown() {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.connect_to(address).await {
                tracing::debug!(address = %address, error = %e, "background connection failed");
            }
        });
    }

    fn handle_closed(self: &Arc<Self>, id: ConnectionId) {
        let member = self
            .connections
            .iter()
            .find(|entry| entry.value().id() == id)
            .map(|entry| *entry.key());
        let Some((member, connection)) = member
            .and_then(|member| self.connections.remove_if(&member, |_, c| c.id() == id))
        else {
            return;
        };

        let reason = connection.close_reason().unwrap_or("closed").to_string();
        let _ = self.event_sender.send(ConnectionEvent::Closed {
            id,
            address: connection.address(),
            reason,
        });
        for listener in self.listeners.load().iter() {
            listener.connection_removed(&connection);
        }

        if self.is_shutdown() {
            return;
        }

        if self.connections.is_empty() {
            self.state.send_replace(ClientState::Disconnected);
            tracing::warn!("lost every connection to the cluster");
            self.fire_lifecycle(LifecycleEvent::ClientDisconnected);
            if self.config.network().reconnect_mode().is_enabled() {
                self.reconnect_in_background();
            }
        } else if self.config.network().smart_routing() && self.cluster.snapshot().contains(member) {
            let manager = Arc::clone(self);
            tokio::spawn(async move { manager.reconnect_member(member).await });
        }
    }

    fn reconnect_in_background(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let result = manager.connect_to_cluster().await;
            manager.reconnecting.store(false, Ordering::Release);
            if let Err(e) = result {
                if manager.is_shutdown() {
                    return;
                }
                tracing::error!(error = %e, "unable to reconnect to the cluster");
                let _ = manager.event_sender.send(ConnectionEvent::ReconnectFailed {
                    error: e.to_string(),
                });
            }
        });
    }

    /// Reconnects to a member that is still in the member table.
    #[instrument(name = "connection_manager.reconnect_member", skip(self), fields(member = %member))]
    async fn reconnect_member(self: Arc<Self>, member: Uuid) {
        let retry = self.config.retry();
        let deadline = Instant::now() + retry.cluster_connect_timeout();
        let mut backoff = retry.initial_backoff();
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() || self.connection_for_member(member).is_some() {
                return;
            }
            let Some(address) = self
                .cluster
                .member(member)
                .and_then(|info| info.address().to_socket_addr())
            else {
                tracing::debug!("member left the cluster, not reconnecting");
                return;
            };
            if Instant::now() >= deadline {
                tracing::warn!(attempts = attempt, "giving up reconnecting to member");
                return;
            }

            attempt += 1;
            tracing::debug!(attempt = attempt, backoff = ?backoff, "attempting reconnection");
            if !self.sleep_unless_shutdown(backoff).await {
                return;
            }

            match self.connect_to(address).await {
                Ok(_) => {
                    tracing::info!(attempt = attempt, "reconnection successful");
                    return;
                }
                Err(e) => tracing::warn!(attempt = attempt, error = %e, "reconnection attempt failed"),
            }

            backoff = calculate_backoff_with_jitter(
                backoff,
                retry.multiplier(),
                retry.max_backoff(),
                retry.jitter(),
            );
        }
    }

    fn handle_member_event(self: &Arc<Self>, event: MemberEvent) {
        match event.event_type {
            MemberEventType::Added => {
                if !self.config.network().smart_routing() || self.connection_for_member(event.member.uuid).is_some() {
                    return;
                }
                match event.member.address().to_socket_addr() {
                    Some(address) => self.connect_in_background(address),
                    None => tracing::warn!(member = %event.member, "member address is not an IP address"),
                }
            }
            MemberEventType::Removed => {
                if let Some(connection) = self.connection_for_member(event.member.uuid) {
                    connection.close("member left the cluster");
                }
            }
        }
    }

    /// Brings the pool in line with the member table after missed events.
    fn reconcile_members(self: &Arc<Self>) {
        let table = self.cluster.snapshot();
        if table.members().is_empty() {
            return;
        }
        for connection in self.active_connections() {
            if let Some(member) = connection.member_uuid() {
                if !table.contains(member) {
                    connection.close("member left the cluster");
                }
            }
        }
        if self.config.network().smart_routing() {
            for member in table.members() {
                if self.connection_for_member(member.uuid).is_none() {
                    if let Some(address) = member.address().to_socket_addr() {
                        self.connect_in_background(address);
                    }
                }
            }
        }
    }

    fn check_heartbeats(self: &Arc<Self>, heartbeat_interval: Duration, heartbeat_timeout: Duration) {
        for connection in self.active_connections() {
            let idle_read = connection.last_read_elapsed();
            if idle_read > heartbeat_timeout {
                tracing::warn!(
                    connection = %connection.id(),
                    idle = ?idle_read,
                    "no data received within heartbeat timeout"
                );
                connection.close(format!("heartbeat timed out after {:?}", idle_read));
                continue;
            }

            if connection.last_write_elapsed() >= heartbeat_interval {
                let mut message = ping::encode_request();
                message.set_correlation_id(self.next_correlation_id());
                tokio::spawn(async move {
                    let result = connection
                        .invoke(message, heartbeat_timeout)
                        .await
                        .and_then(|reply| ping::decode_response(&reply));
                    if let Err(e) = result {
                        tracing::debug!(connection = %connection.id(), error = %e, "ping failed");
                    }
                });
            }
        }
    }

    /// Whether an invocation that found no connection should keep retrying.
    pub(crate) fn routing_is_retryable(&self) -> bool {
        !self.connections.is_empty() || self.config.network().reconnect_mode() == ReconnectMode::On
    }

    /// Picks the connection an invocation for `target` should be sent on.
    pub fn select(self: &Arc<Self>, target: &InvocationTarget) -> Result<Arc<Connection>> {
        self.ensure_active()?;

        match target {
            InvocationTarget::Connection(id) => self
                .connection_by_id(*id)
                .ok_or_else(|| GridError::ConnectionClosed(format!("{} is not active", id))),
            _ if self.connections.is_empty() => Err(match self.config.network().reconnect_mode() {
                ReconnectMode::On => GridError::Routing("no connection to the cluster".to_string()),
                ReconnectMode::Async | ReconnectMode::Off => GridError::Routing("client offline".to_string()),
            }),
            InvocationTarget::Any => self.any_connection(),
            InvocationTarget::Partition(partition_id) => {
                let owner = self.cluster.snapshot().partition_owner(*partition_id);
                if let Some(owner) = owner {
                    if let Some(connection) = self.connection_for_member(owner) {
                        return Ok(connection);
                    }
                    if self.config.network().smart_routing() {
                        self.connect_to_member_in_background(owner);
                    }
                }
                self.any_connection()
            }
            InvocationTarget::Member(member) => {
                if let Some(connection) = self.connection_for_member(*member) {
                    return Ok(connection);
                }
                if self.cluster.member(*member).is_none() {
                    return Err(GridError::Routing(format!("member {} is not in the cluster", member)));
                }
                self.connect_to_member_in_background(*member);
                Err(GridError::Routing(format!("no connection to member {}", member)))
            }
        }
    }

    fn any_connection(&self) -> Result<Arc<Connection>> {
        if self.config.network().smart_routing() {
            let members = self.cluster.members();
            if let Some(connection) = self
                .load_balancer
                .select(&members)
                .and_then(|member| self.connection_for_member(member.uuid))
            {
                return Ok(connection);
            }
        }
        self.active_connections()
            .into_iter()
            .next()
            .ok_or_else(|| GridError::Routing("no connection to the cluster".to_string()))
    }

    fn connect_to_member_in_background(self: &Arc<Self>, member: Uuid) {
        if let Some(address) = self
            .cluster
            .member(member)
            .and_then(|info| info.address().to_socket_addr())
        {
            self.connect_in_background(address);
        }
    }

    /// Closes every connection and stops the background tasks.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.state.send_replace(ClientState::Shutdown);
        self.listeners.store(Arc::new(Vec::new()));

        let connections: Vec<Arc<Connection>> =
            self.connections.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.connections.clear();
        for connection in &connections {
            connection.close("client is shutting down");
        }
        self.dispatcher.shutdown();
        tracing::info!(closed = connections.len(), "connection manager shut down");
    }
}

async fn run_closed_notices(
    manager: Weak<ConnectionManager>,
    mut closed: mpsc::UnboundedReceiver<ConnectionId>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = closed.recv() => match (next, manager.upgrade()) {
                (Some(id), Some(manager)) => manager.handle_closed(id),
                _ => break,
            },
        }
    }
}

async fn run_membership(
    manager: Weak<ConnectionManager>,
    mut events: broadcast::Receiver<MemberEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = events.recv() => next,
        };
        let Some(strong) = manager.upgrade() else { break };
        match next {
            Ok(event) => strong.handle_member_event(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed = missed, "membership events lagged, reconciling");
                strong.reconcile_members();
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_heartbeat(
    manager: Weak<ConnectionManager>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => match manager.upgrade() {
                Some(manager) => manager.check_heartbeats(heartbeat_interval, heartbeat_timeout),
                None => break,
            },
        }
    }
    tracing::debug!("heartbeat task stopped");
}
