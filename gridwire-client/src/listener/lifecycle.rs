//! Client lifecycle events.

use std::fmt;

/// Receives client lifecycle transitions.
///
/// All methods have empty default implementations, so only the interesting
/// transitions need overriding. Listeners are called from a background task,
/// never from a connection's read loop.
///
/// # Example
///
/// ```ignore
/// use gridwire_client::listener::LifecycleListener;
///
/// struct Reporter;
///
/// impl LifecycleListener for Reporter {
///     fn client_disconnected(&self) {
///         eprintln!("lost the cluster");
///     }
/// }
///
/// client.add_lifecycle_listener(Reporter);
/// ```
pub trait LifecycleListener: Send + Sync {
    /// Called when the client has connected to the cluster.
    fn client_connected(&self) {}

    /// Called when the client has lost its last connection.
    fn client_disconnected(&self) {}

    /// Called when the client reconnected to a different cluster.
    fn client_changed_cluster(&self) {}

    /// Called when the client has started and is ready to accept operations.
    fn client_started(&self) {}

    /// Called when the client has completed shutdown.
    fn client_shutdown(&self) {}
}

impl std::fmt::Debug for dyn LifecycleListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LifecycleListener")
    }
}

/// Events emitted during client lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The client is starting and connecting to the cluster.
    Starting,
    /// The client has started and is ready to accept operations.
    Started,
    /// The client is beginning the shutdown process.
    ShuttingDown,
    /// The client has completed shutdown.
    Shutdown,
    /// The client has connected to the cluster.
    ClientConnected,
    /// The client has lost its last connection to the cluster.
    ClientDisconnected,
    /// The client connected to a cluster with a different cluster id.
    ClientChangedCluster,
}

impl LifecycleEvent {
    /// Returns a human-readable name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Shutdown => "SHUTDOWN",
            Self::ClientConnected => "CLIENT_CONNECTED",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
            Self::ClientChangedCluster => "CLIENT_CHANGED_CLUSTER",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub(crate) fn notify(listener: &dyn LifecycleListener, event: LifecycleEvent) {
    match event {
        LifecycleEvent::ClientConnected => listener.client_connected(),
        LifecycleEvent::ClientDisconnected => listener.client_disconnected(),
        LifecycleEvent::ClientChangedCluster => listener.client_changed_cluster(),
        LifecycleEvent::Started => listener.client_started(),
        LifecycleEvent::Shutdown => listener.client_shutdown(),
        LifecycleEvent::Starting | LifecycleEvent::ShuttingDown => {}
    }
}
