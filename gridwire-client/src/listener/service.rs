//! Server-side listener registrations.
//!
//! A subscription is installed with one add request per connection (every
//! connection in smart routing mode, a single one otherwise) and is
//! installed again on every connection opened later. Subscriptions sharing a
//! key share one wire registration: only the first subscriber sends the add
//! request and only the last one to leave sends the remove request.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use gridwire_core::{ClientMessage, GridError, Result};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::EventDispatcher;
use super::EventHandler;
use crate::connection::{Connection, ConnectionId, ConnectionListener, ConnectionManager};

/// Builds the add and remove requests of one kind of server-side listener.
pub trait ListenerCodec: Send + Sync {
    /// Encodes the add request. `local_only` asks the member to send only
    /// events that originate on itself.
    fn encode_add_request(&self, local_only: bool) -> ClientMessage;

    /// Decodes the registration id from the add response.
    fn decode_add_response(&self, response: &ClientMessage) -> Result<Uuid>;

    /// Encodes the remove request for a registration id.
    fn encode_remove_request(&self, registration_id: Uuid) -> ClientMessage;

    /// Decodes the remove response.
    fn decode_remove_response(&self, response: &ClientMessage) -> Result<bool>;
}

/// Handle of one logical subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

struct ConnectionRegistration {
    correlation_id: i64,
    server_id: Uuid,
    connection: Arc<Connection>,
}

type Handlers = ArcSwap<Vec<(SubscriptionId, EventHandler)>>;

struct WireRegistration {
    codec: Arc<dyn ListenerCodec>,
    handlers: Arc<Handlers>,
    connections: HashMap<ConnectionId, ConnectionRegistration>,
}

#[derive(Default)]
struct Registry {
    wire: HashMap<String, WireRegistration>,
    owners: HashMap<SubscriptionId, String>,
}

/// Manages subscriptions and keeps them installed across reconnections.
pub struct ListenerService {
    this: Weak<Self>,
    manager: Weak<ConnectionManager>,
    dispatcher: Arc<EventDispatcher>,
    registry: Mutex<Registry>,
    smart_routing: bool,
    timeout: Duration,
}

impl fmt::Debug for ListenerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerService")
            .field("smart_routing", &self.smart_routing)
            .finish()
    }
}

impl ListenerService {
    /// Creates the service. Register it with
    /// [`ConnectionManager::add_connection_listener`] so subscriptions follow
    /// new connections.
    pub fn new(
        manager: &Arc<ConnectionManager>,
        dispatcher: Arc<EventDispatcher>,
        smart_routing: bool,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            manager: Arc::downgrade(manager),
            dispatcher,
            registry: Mutex::new(Registry::default()),
            smart_routing,
            timeout,
        })
    }

    fn manager(&self) -> Result<Arc<ConnectionManager>> {
        self.manager
            .upgrade()
            .filter(|manager| !manager.is_shutdown())
            .ok_or_else(|| GridError::ClientNotActive("client is shut down".to_string()))
    }

    /// Installs a subscription of its own.
    pub async fn subscribe(
        &self,
        codec: Arc<dyn ListenerCodec>,
        handler: EventHandler,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId::new();
        self.subscribe_keyed(id, id.to_string(), codec, handler).await
    }

    /// Joins the subscription registered under `key`, installing it on the
    /// cluster if this is the first subscriber.
    pub async fn subscribe_shared(
        &self,
        key: impl Into<String>,
        codec: Arc<dyn ListenerCodec>,
        handler: EventHandler,
    ) -> Result<SubscriptionId> {
        self.subscribe_keyed(SubscriptionId::new(), key.into(), codec, handler)
            .await
    }

    async fn subscribe_keyed(
        &self,
        id: SubscriptionId,
        key: String,
        codec: Arc<dyn ListenerCodec>,
        handler: EventHandler,
    ) -> Result<SubscriptionId> {
        let manager = self.manager()?;
        let mut registry = self.registry.lock().await;

        if let Some(wire) = registry.wire.get(&key) {
            wire.handlers.rcu(|current| {
                let mut next = (**current).clone();
                next.push((id, Arc::clone(&handler)));
                next
            });
            registry.owners.insert(id, key.clone());
            tracing::debug!(subscription = %id, key = %key, "joined existing subscription");
            return Ok(id);
        }

        let mut wire = WireRegistration {
            codec,
            handlers: Arc::new(ArcSwap::from_pointee(vec![(id, handler)])),
            connections: HashMap::new(),
        };

        let targets = if self.smart_routing {
            manager.active_connections()
        } else {
            manager.active_connections().into_iter().take(1).collect()
        };
        for connection in targets {
            match self.install(&manager, &connection, &wire).await {
                Ok(registration) => {
                    wire.connections.insert(connection.id(), registration);
                }
                Err(e) if connection.is_alive() && !e.is_connection_loss() => {
                    tracing::warn!(key = %key, error = %e, "failed to add listener, rolling back");
                    self.remove_registrations(&wire, wire.connections.values()).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(connection = %connection.id(), error = %e, "connection lost while adding listener");
                }
            }
        }

        tracing::info!(
            subscription = %id,
            key = %key,
            connections = wire.connections.len(),
            "listener added"
        );
        registry.wire.insert(key.clone(), wire);
        registry.owners.insert(id, key);
        Ok(id)
    }

    /// Leaves a subscription. The remove request is sent once the last
    /// subscriber of its key left. Returns false for unknown ids.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut registry = self.registry.lock().await;
        let Some(key) = registry.owners.remove(&id) else {
            return Ok(false);
        };

        let remaining = match registry.wire.get(&key) {
            Some(wire) => {
                wire.handlers.rcu(|current| {
                    current
                        .iter()
                        .filter(|(owner, _)| *owner != id)
                        .cloned()
                        .collect::<Vec<_>>()
                });
                wire.handlers.load().len()
            }
            None => 0,
        };
        if remaining > 0 {
            tracing::debug!(subscription = %id, key = %key, remaining = remaining, "left shared subscription");
            return Ok(true);
        }

        if let Some(wire) = registry.wire.remove(&key) {
            self.remove_registrations(&wire, wire.connections.values()).await;
            tracing::info!(subscription = %id, key = %key, "listener removed");
        }
        Ok(true)
    }

    /// Returns how many connections hold a live registration for the
    /// subscription `id`.
    pub async fn registration_count(&self, id: SubscriptionId) -> usize {
        let registry = self.registry.lock().await;
        registry
            .owners
            .get(&id)
            .and_then(|key| registry.wire.get(key))
            .map_or(0, |wire| {
                wire.connections
                    .values()
                    .filter(|r| r.connection.is_alive())
                    .count()
            })
    }

    async fn install(
        &self,
        manager: &ConnectionManager,
        connection: &Arc<Connection>,
        wire: &WireRegistration,
    ) -> Result<ConnectionRegistration> {
        let correlation_id = manager.next_correlation_id();
        let handlers = Arc::clone(&wire.handlers);
        // Events may arrive before the add response, so the handler goes in first.
        self.dispatcher.register(
            correlation_id,
            Arc::new(move |event: ClientMessage| {
                for (_, handler) in handlers.load().iter() {
                    handler(event.clone());
                }
            }),
        );

        let mut request = wire.codec.encode_add_request(self.smart_routing);
        request.set_correlation_id(correlation_id);
        let result = connection
            .invoke(request, self.timeout)
            .await
            .and_then(|response| wire.codec.decode_add_response(&response));

        match result {
            Ok(server_id) => {
                tracing::debug!(
                    connection = %connection.id(),
                    correlation_id = correlation_id,
                    registration = %server_id,
                    "listener registered on connection"
                );
                Ok(ConnectionRegistration {
                    correlation_id,
                    server_id,
                    connection: Arc::clone(connection),
                })
            }
            Err(e) => {
                self.dispatcher.deregister(correlation_id);
                Err(e)
            }
        }
    }

    async fn remove_registrations<'a>(
        &self,
        wire: &WireRegistration,
        registrations: impl Iterator<Item = &'a ConnectionRegistration>,
    ) {
        let manager = self.manager.upgrade();
        for registration in registrations {
            self.dispatcher.deregister(registration.correlation_id);
            let (Some(manager), true) = (manager.as_ref(), registration.connection.is_alive()) else {
                continue;
            };

            let mut request = wire.codec.encode_remove_request(registration.server_id);
            request.set_correlation_id(manager.next_correlation_id());
            let result = registration
                .connection
                .invoke(request, self.timeout)
                .await
                .and_then(|response| wire.codec.decode_remove_response(&response));
            if let Err(e) = result {
                tracing::warn!(
                    connection = %registration.connection.id(),
                    registration = %registration.server_id,
                    error = %e,
                    "failed to remove listener"
                );
            }
        }
    }

    /// Installs every subscription missing on `connection`.
    async fn catch_up(&self, connection: Arc<Connection>) {
        let Ok(manager) = self.manager() else {
            return;
        };
        let mut registry = self.registry.lock().await;

        for (key, wire) in registry.wire.iter_mut() {
            self.prune_dead(wire);
            if !connection.is_alive() {
                return;
            }
            if wire.connections.contains_key(&connection.id())
                || (!self.smart_routing && !wire.connections.is_empty())
            {
                continue;
            }

            match self.install(&manager, &connection, wire).await {
                Ok(registration) => {
                    wire.connections.insert(connection.id(), registration);
                }
                Err(e) => tracing::warn!(
                    connection = %connection.id(),
                    key = %key,
                    error = %e,
                    "failed to install listener on new connection"
                ),
            }
        }
    }

    async fn forget_connection(&self, connection: ConnectionId) {
        let mut registry = self.registry.lock().await;
        for wire in registry.wire.values_mut() {
            if let Some(registration) = wire.connections.remove(&connection) {
                self.dispatcher.deregister(registration.correlation_id);
            }
        }
    }

    fn prune_dead(&self, wire: &mut WireRegistration) {
        let dispatcher = &self.dispatcher;
        wire.connections.retain(|_, registration| {
            let alive = registration.connection.is_alive();
            if !alive {
                dispatcher.deregister(registration.correlation_id);
            }
            alive
        });
    }
}

impl ConnectionListener for ListenerService {
    fn connection_added(&self, connection: &Arc<Connection>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let connection = Arc::clone(connection);
        tokio::spawn(async move { this.catch_up(connection).await });
    }

    fn connection_removed(&self, connection: &Arc<Connection>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let id = connection.id();
        tokio::spawn(async move { this.forget_connection(id).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterService;
    use crate::config::ClientConfig;
    use crate::connection::{default_load_balancer, StaticAddressDiscovery, TcpConnector};

    struct NoopCodec;

    impl ListenerCodec for NoopCodec {
        fn encode_add_request(&self, _local_only: bool) -> ClientMessage {
            ClientMessage::new_request(0x7F0100, -1)
        }

        fn decode_add_response(&self, _response: &ClientMessage) -> Result<Uuid> {
            Ok(Uuid::nil())
        }

        fn encode_remove_request(&self, _registration_id: Uuid) -> ClientMessage {
            ClientMessage::new_request(0x7F0200, -1)
        }

        fn decode_remove_response(&self, _response: &ClientMessage) -> Result<bool> {
            Ok(true)
        }
    }

    fn offline_service() -> (Arc<ConnectionManager>, Arc<ListenerService>) {
        let config = Arc::new(ClientConfig::default());
        let dispatcher = EventDispatcher::new(config.events());
        let manager = ConnectionManager::new(
            Arc::clone(&config),
            Arc::new(TcpConnector::new()),
            Arc::new(StaticAddressDiscovery::new(Vec::new())),
            default_load_balancer(),
            Arc::clone(&dispatcher),
            Arc::new(ClusterService::new()),
        );
        let service = ListenerService::new(&manager, dispatcher, true, Duration::from_secs(1));
        (manager, service)
    }

    #[tokio::test]
    async fn test_shared_subscription_is_reference_counted() {
        let (_manager, service) = offline_service();
        let codec: Arc<dyn ListenerCodec> = Arc::new(NoopCodec);

        let first = service
            .subscribe_shared("objects", Arc::clone(&codec), Arc::new(|_| {}))
            .await
            .unwrap();
        let second = service
            .subscribe_shared("objects", Arc::clone(&codec), Arc::new(|_| {}))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(service.registry.lock().await.wire.len(), 1);

        assert!(service.unsubscribe(first).await.unwrap());
        assert_eq!(service.registry.lock().await.wire.len(), 1);
        assert!(service.unsubscribe(second).await.unwrap());
        assert!(service.registry.lock().await.wire.is_empty());
        assert!(!service.unsubscribe(second).await.unwrap());
    }

    #[tokio::test]
    async fn test_unshared_subscriptions_are_independent() {
        let (_manager, service) = offline_service();
        let codec: Arc<dyn ListenerCodec> = Arc::new(NoopCodec);

        let a = service.subscribe(Arc::clone(&codec), Arc::new(|_| {})).await.unwrap();
        let b = service.subscribe(codec, Arc::new(|_| {})).await.unwrap();
        assert_eq!(service.registry.lock().await.wire.len(), 2);
        assert_eq!(service.registration_count(a).await, 0);

        service.unsubscribe(a).await.unwrap();
        assert_eq!(service.registry.lock().await.wire.len(), 1);
        service.unsubscribe(b).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fails() {
        let (manager, service) = offline_service();
        manager.shutdown();
        let result = service.subscribe(Arc::new(NoopCodec), Arc::new(|_| {})).await;
        assert!(matches!(result, Err(GridError::ClientNotActive(_))));
    }

    #[test]
    fn test_subscription_id_display() {
        let id = SubscriptionId(Uuid::nil());
        assert_eq!(id.to_string(), format!("subscription-{}", Uuid::nil()));
    }
}
