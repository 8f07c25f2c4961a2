//! Keeps the cluster view registration installed on one connection.
//!
//! The member list and partition table arrive as events on a single
//! registration. When the connection holding it closes, the registration
//! moves to another open connection and the member pushes full views again.

use std::sync::{Arc, Mutex, Weak};

use gridwire_core::protocol::messages::cluster_view;
use gridwire_core::ClientMessage;

use super::ClusterService;
use crate::connection::{Connection, ConnectionId, ConnectionListener, ConnectionManager};
use crate::listener::{EventDispatcher, EventHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    connection: ConnectionId,
    correlation_id: i64,
}

pub(crate) struct ClusterViewListener {
    this: Weak<Self>,
    manager: Weak<ConnectionManager>,
    cluster: Arc<ClusterService>,
    dispatcher: Arc<EventDispatcher>,
    registration: Mutex<Option<Registration>>,
    timeout: std::time::Duration,
}

impl ClusterViewListener {
    pub(crate) fn new(
        manager: &Arc<ConnectionManager>,
        cluster: Arc<ClusterService>,
        dispatcher: Arc<EventDispatcher>,
        timeout: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            manager: Arc::downgrade(manager),
            cluster,
            dispatcher,
            registration: Mutex::new(None),
            timeout,
        })
    }

    fn current(&self) -> Option<Registration> {
        *self.registration.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims the registration slot for `connection` and sends the request.
    fn try_install(&self, connection: &Arc<Connection>) {
        let (Some(this), Some(manager)) = (self.this.upgrade(), self.manager.upgrade()) else {
            return;
        };
        if manager.is_shutdown() || !connection.is_alive() {
            return;
        }

        let correlation_id = manager.next_correlation_id();
        let registration = Registration {
            connection: connection.id(),
            correlation_id,
        };
        {
            let mut slot = self.registration.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return;
            }
            *slot = Some(registration);
        }

        let cluster = Arc::clone(&self.cluster);
        let handler: EventHandler = Arc::new(move |event: ClientMessage| {
            match cluster_view::decode_event(&event) {
                Ok(Some(view)) => {
                    cluster.apply(view);
                }
                Ok(None) => tracing::debug!(
                    message_type = ?event.message_type(),
                    "ignoring unknown cluster view event"
                ),
                Err(e) => tracing::warn!(error = %e, "failed to decode cluster view event"),
            }
        });
        self.dispatcher.register(correlation_id, handler);

        let mut request = cluster_view::encode_request();
        request.set_correlation_id(correlation_id);
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            let result = connection
                .invoke(request, this.timeout)
                .await
                .and_then(|reply| cluster_view::decode_response(&reply));
            match result {
                Ok(()) => tracing::debug!(connection = %connection.id(), "cluster view listener installed"),
                Err(e) => {
                    tracing::warn!(
                        connection = %connection.id(),
                        error = %e,
                        "failed to install cluster view listener"
                    );
                    if this.release(registration) {
                        this.install_elsewhere(Some(connection.id()));
                    }
                }
            }
        });
    }

    /// Frees the slot if it still holds `registration`.
    fn release(&self, registration: Registration) -> bool {
        let mut slot = self.registration.lock().unwrap_or_else(|e| e.into_inner());
        if *slot != Some(registration) {
            return false;
        }
        *slot = None;
        drop(slot);
        self.dispatcher.deregister(registration.correlation_id);
        true
    }

    fn install_elsewhere(&self, excluded: Option<ConnectionId>) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if let Some(connection) = manager
            .active_connections()
            .into_iter()
            .find(|c| Some(c.id()) != excluded)
        {
            self.try_install(&connection);
        }
    }
}

impl ConnectionListener for ClusterViewListener {
    fn connection_added(&self, connection: &Arc<Connection>) {
        if self.current().is_none() {
            self.try_install(connection);
        }
    }

    fn connection_removed(&self, connection: &Arc<Connection>) {
        match self.current() {
            Some(registration) if registration.connection == connection.id() => {
                if self.release(registration) {
                    tracing::debug!(connection = %connection.id(), "cluster view connection closed, moving listener");
                    self.install_elsewhere(Some(connection.id()));
                }
            }
            _ => {}
        }
    }
}
