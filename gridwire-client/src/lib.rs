//! Async client runtime for gridwire data-grid clusters.
//!
//! The client opens authenticated connections to cluster members,
//! multiplexes requests over them by correlation id, routes
//! partition-bound requests to the partition owner and retries them across
//! topology changes. Server-side listeners are kept installed on every
//! connection, including connections opened after the listener was added.
//!
//! # Quick Start
//!
//! ```ignore
//! use gridwire_client::{ClientConfig, GridClient, InvocationTarget};
//! use gridwire_client::core::protocol::messages::ping;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .cluster_name("dev")
//!         .add_address("127.0.0.1:5701".parse()?)
//!         .build()?;
//!
//!     let client = GridClient::connect(config).await?;
//!     for member in client.members() {
//!         println!("{}", member);
//!     }
//!
//!     let response = client.invoke(ping::encode_request(), InvocationTarget::Any).await?;
//!     ping::decode_response(&response)?;
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Listening for Events
//!
//! ```ignore
//! let subscription = client
//!     .add_distributed_object_listener(|event| println!("{:?}", event))
//!     .await?;
//!
//! client.unsubscribe(subscription).await?;
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `config-file` | Load `ClientConfig` from YAML or TOML |

#![warn(missing_docs)]

mod client;
pub mod cluster;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod invocation;
pub mod listener;

pub use client::{GridClient, GridClientBuilder};
pub use cluster::{ClusterService, MemberTable, MembershipDiff, Partition, PartitionService};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, Credentials, EventConfig, EventConfigBuilder,
    InvocationConfig, InvocationConfigBuilder, NetworkConfig, NetworkConfigBuilder,
    ReconnectMode, RetryConfig, RetryConfigBuilder, SecurityConfig, SecurityConfigBuilder,
    SocketConfig, SocketConfigBuilder,
};
pub use connection::{
    BoxedStream, ClientState, ClusterDiscovery, Connection, ConnectionEvent, ConnectionId,
    ConnectionListener, ConnectionManager, Connector, LoadBalancer, MemberStream,
    RandomLoadBalancer, RoundRobinLoadBalancer, StaticAddressDiscovery, TcpConnector,
};
pub use gridwire_core as core;
pub use gridwire_core::{GridError, Result};
pub use invocation::{InvocationFuture, InvocationState, InvocationTarget};
pub use listener::{
    DistributedObjectListenerCodec, EventDispatcher, EventHandler, LifecycleEvent,
    LifecycleListener, ListenerCodec, ListenerService, MemberEvent, MemberEventType,
    MembershipListener, SubscriptionId,
};
