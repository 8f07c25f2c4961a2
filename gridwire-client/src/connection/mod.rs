//! Connection management for the gridwire client.

mod connection;
mod connector;
mod discovery;
mod load_balancer;
mod manager;

pub use connection::{Connection, ConnectionContext, ConnectionId};
pub use connector::{BoxedStream, Connector, MemberStream, TcpConnector};
pub use discovery::{ClusterDiscovery, StaticAddressDiscovery};
pub use load_balancer::{default_load_balancer, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer};
pub use manager::{ClientState, ConnectionEvent, ConnectionListener, ConnectionManager};
