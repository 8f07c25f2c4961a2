//! gridwire client entry point.

use std::sync::Arc;
use std::time::Duration;

use gridwire_core::protocol::messages::distributed_object::DistributedObjectEvent;
use gridwire_core::{ClientMessage, MemberInfo, Result};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cluster::{ClusterService, ClusterViewListener, PartitionService};
use crate::config::ClientConfig;
use crate::connection::{
    default_load_balancer, ClientState, ClusterDiscovery, ConnectionEvent, ConnectionManager,
    Connector, LoadBalancer, StaticAddressDiscovery, TcpConnector,
};
use crate::invocation::{InvocationFuture, InvocationService, InvocationTarget};
use crate::listener::{
    distributed_object_handler, notify_lifecycle, notify_membership,
    DistributedObjectListenerCodec, EventDispatcher, EventHandler, LifecycleEvent,
    LifecycleListener, ListenerCodec, ListenerService, MemberEvent, MembershipListener,
    SubscriptionId, DISTRIBUTED_OBJECT_LISTENER_KEY,
};

/// A connected client of a gridwire cluster.
///
/// The client keeps connections to the cluster members (all of them in
/// smart routing mode), follows membership and partition table changes, and
/// multiplexes requests over those connections.
///
/// # Example
///
/// ```ignore
/// use gridwire_client::{ClientConfig, GridClient, InvocationTarget};
/// use gridwire_client::core::protocol::messages::ping;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .cluster_name("dev")
///         .add_address("127.0.0.1:5701".parse()?)
///         .build()?;
///
///     let client = GridClient::connect(config).await?;
///     let response = client.invoke(ping::encode_request(), InvocationTarget::Any).await?;
///     ping::decode_response(&response)?;
///
///     client.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct GridClient {
    config: Arc<ClientConfig>,
    cluster: Arc<ClusterService>,
    manager: Arc<ConnectionManager>,
    invocations: Arc<InvocationService>,
    listeners: Arc<ListenerService>,
}

impl GridClient {
    /// Connects to the cluster with the default TCP connector and the
    /// configured member addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if no member accepted the client within the cluster
    /// connect timeout, or if authentication was rejected.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    /// Starts building a client with custom transport, discovery or
    /// listeners attached before the first connection opens.
    pub fn builder(config: ClientConfig) -> GridClientBuilder {
        GridClientBuilder::new(config)
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the cluster name this client is connected to.
    pub fn cluster_name(&self) -> &str {
        self.config.cluster_name()
    }

    /// Returns the uuid this client presents to the cluster.
    pub fn client_uuid(&self) -> Uuid {
        self.manager.client_uuid()
    }

    /// Returns the id of the cluster the client is connected to.
    pub fn cluster_id(&self) -> Option<Uuid> {
        self.manager.cluster_id()
    }

    /// Returns the current client state.
    pub fn state(&self) -> ClientState {
        self.manager.state()
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.manager.connection_count()
    }

    /// Returns the current member list.
    pub fn members(&self) -> Vec<MemberInfo> {
        self.cluster.members()
    }

    /// Returns the connection manager.
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Returns the partition service.
    pub fn partition_service(&self) -> PartitionService {
        PartitionService::new(Arc::clone(&self.cluster))
    }

    /// Sends a request to `target` with the configured invocation timeout.
    pub fn invoke(&self, message: ClientMessage, target: InvocationTarget) -> InvocationFuture {
        self.invocations.invoke(message, target)
    }

    /// Sends a request to `target` with an explicit timeout.
    pub fn invoke_with_timeout(
        &self,
        message: ClientMessage,
        target: InvocationTarget,
        timeout: Duration,
    ) -> InvocationFuture {
        self.invocations.invoke_with_timeout(message, target, timeout)
    }

    /// Sends a request to the owner of the partition that `key` maps to.
    /// While the partition count is unknown the request goes to any member.
    pub fn invoke_on_key(&self, message: ClientMessage, key: &[u8]) -> InvocationFuture {
        let target = self
            .partition_service()
            .partition_id_for_key(key)
            .map_or(InvocationTarget::Any, InvocationTarget::Partition);
        self.invocations.invoke(message, target)
    }

    /// Installs a server-side listener of its own.
    pub async fn subscribe(
        &self,
        codec: Arc<dyn ListenerCodec>,
        handler: EventHandler,
    ) -> Result<SubscriptionId> {
        self.listeners.subscribe(codec, handler).await
    }

    /// Joins the shared listener registered under `key`.
    pub async fn subscribe_shared(
        &self,
        key: impl Into<String>,
        codec: Arc<dyn ListenerCodec>,
        handler: EventHandler,
    ) -> Result<SubscriptionId> {
        self.listeners.subscribe_shared(key, codec, handler).await
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.listeners.unsubscribe(id).await
    }

    /// Returns the listener service.
    pub fn listener_service(&self) -> &Arc<ListenerService> {
        &self.listeners
    }

    /// Adds a listener for distributed object creation and destruction.
    ///
    /// All such listeners of a client share one server-side registration.
    pub async fn add_distributed_object_listener<F>(&self, listener: F) -> Result<SubscriptionId>
    where
        F: Fn(DistributedObjectEvent) + Send + Sync + 'static,
    {
        self.listeners
            .subscribe_shared(
                DISTRIBUTED_OBJECT_LISTENER_KEY,
                Arc::new(DistributedObjectListenerCodec),
                distributed_object_handler(listener),
            )
            .await
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.manager.subscribe_lifecycle()
    }

    /// Subscribes to membership events.
    pub fn subscribe_membership(&self) -> broadcast::Receiver<MemberEvent> {
        self.cluster.subscribe()
    }

    /// Subscribes to connection events.
    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe()
    }

    /// Calls `listener` for every subsequent lifecycle event.
    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        spawn_lifecycle_forwarder(self.manager.subscribe_lifecycle(), listener);
    }

    /// Calls `listener` for every subsequent membership change.
    pub fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>) {
        spawn_membership_forwarder(self.cluster.subscribe(), listener);
    }

    /// Shuts the client down.
    ///
    /// Pending invocations fail with `ClientNotActive`, connections are
    /// closed and listeners stop receiving events. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.manager.is_shutdown() {
            return;
        }
        tracing::info!(cluster = %self.config.cluster_name(), "shutting down gridwire client");
        self.manager.fire_lifecycle(LifecycleEvent::ShuttingDown);
        self.invocations.shutdown();
        self.manager.shutdown();
        self.manager.fire_lifecycle(LifecycleEvent::Shutdown);
        // Lets forwarding tasks observe the final events before returning.
        tokio::task::yield_now().await;
    }
}

/// Builder for a [`GridClient`] with custom seams.
pub struct GridClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    discovery: Option<Arc<dyn ClusterDiscovery>>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
    lifecycle_listeners: Vec<Arc<dyn LifecycleListener>>,
    membership_listeners: Vec<Arc<dyn MembershipListener>>,
}

impl std::fmt::Debug for GridClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridClientBuilder")
            .field("cluster_name", &self.config.cluster_name())
            .field("connector", &self.connector)
            .field("discovery", &self.discovery)
            .field("lifecycle_listeners", &self.lifecycle_listeners.len())
            .field("membership_listeners", &self.membership_listeners.len())
            .finish()
    }
}

impl GridClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            discovery: None,
            load_balancer: None,
            lifecycle_listeners: Vec::new(),
            membership_listeners: Vec::new(),
        }
    }

    /// Uses `connector` to open member streams instead of plain TCP.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses `discovery` instead of the configured addresses.
    pub fn discovery(mut self, discovery: Arc<dyn ClusterDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Uses `load_balancer` for requests without a target member.
    pub fn load_balancer(mut self, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        self.load_balancer = Some(load_balancer);
        self
    }

    /// Adds a lifecycle listener that also sees the startup events.
    pub fn lifecycle_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.lifecycle_listeners.push(listener);
        self
    }

    /// Adds a membership listener that also sees the initial member list.
    pub fn membership_listener(mut self, listener: Arc<dyn MembershipListener>) -> Self {
        self.membership_listeners.push(listener);
        self
    }

    /// Connects to the cluster.
    pub async fn connect(self) -> Result<GridClient> {
        let config = Arc::new(self.config);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));
        let discovery = self.discovery.unwrap_or_else(|| {
            Arc::new(StaticAddressDiscovery::new(config.network().addresses().to_vec()))
        });
        let load_balancer = self.load_balancer.unwrap_or_else(default_load_balancer);

        let dispatcher = EventDispatcher::new(config.events());
        let cluster = Arc::new(ClusterService::new());
        let manager = ConnectionManager::new(
            Arc::clone(&config),
            connector,
            discovery,
            load_balancer,
            Arc::clone(&dispatcher),
            Arc::clone(&cluster),
        );

        let request_timeout = config.invocation().timeout();
        manager.add_connection_listener(ClusterViewListener::new(
            &manager,
            Arc::clone(&cluster),
            Arc::clone(&dispatcher),
            request_timeout,
        ));
        let listeners = ListenerService::new(
            &manager,
            dispatcher,
            config.network().smart_routing(),
            request_timeout,
        );
        manager.add_connection_listener(Arc::clone(&listeners) as _);
        let invocations = InvocationService::new(config.invocation().clone(), Arc::clone(&manager));

        for listener in self.lifecycle_listeners {
            spawn_lifecycle_forwarder(manager.subscribe_lifecycle(), listener);
        }
        for listener in self.membership_listeners {
            spawn_membership_forwarder(cluster.subscribe(), listener);
        }

        let client = GridClient {
            config,
            cluster,
            manager,
            invocations,
            listeners,
        };

        client.manager.fire_lifecycle(LifecycleEvent::Starting);
        if let Err(e) = client.manager.start().await {
            tracing::error!(
                cluster = %client.config.cluster_name(),
                error = %e,
                "failed to connect to the cluster"
            );
            client.shutdown().await;
            return Err(e);
        }
        client.manager.fire_lifecycle(LifecycleEvent::Started);

        tracing::info!(
            cluster = %client.config.cluster_name(),
            client = %client.client_uuid(),
            members = client.cluster.members().len(),
            "connected to gridwire cluster"
        );
        Ok(client)
    }
}

fn spawn_lifecycle_forwarder(
    mut events: broadcast::Receiver<LifecycleEvent>,
    listener: Arc<dyn LifecycleListener>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    notify_lifecycle(listener.as_ref(), event);
                    if event == LifecycleEvent::Shutdown {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "lifecycle listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_membership_forwarder(
    mut events: broadcast::Receiver<MemberEvent>,
    listener: Arc<dyn MembershipListener>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => notify_membership(listener.as_ref(), &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "membership listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectMode;
    use gridwire_core::GridError;

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GridClient>();
    }

    #[tokio::test]
    async fn test_connect_without_members_times_out() {
        let config = ClientConfig::builder()
            .add_address("127.0.0.1:1".parse().unwrap())
            .network(|n| n.connection_timeout(Duration::from_millis(100)).reconnect_mode(ReconnectMode::Off))
            .retry(|r| {
                r.initial_backoff(Duration::from_millis(10))
                    .max_backoff(Duration::from_millis(20))
                    .cluster_connect_timeout(Duration::from_millis(200))
            })
            .build()
            .unwrap();

        let result = GridClient::connect(config).await;
        assert!(matches!(result, Err(GridError::Connection(_))));
    }
}
