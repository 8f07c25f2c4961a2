//! Cluster member discovery.

use std::net::SocketAddr;

use async_trait::async_trait;
use gridwire_core::Result;

/// Supplies the addresses the client tries when (re)connecting to the
/// cluster.
#[async_trait]
pub trait ClusterDiscovery: Send + Sync + std::fmt::Debug {
    /// Discovers candidate member addresses.
    async fn discover(&self) -> Result<Vec<SocketAddr>>;
}

/// Discovery backed by a fixed list of addresses.
#[derive(Debug, Clone)]
pub struct StaticAddressDiscovery {
    addresses: Vec<SocketAddr>,
}

impl StaticAddressDiscovery {
    /// Creates a new static discovery with the given addresses.
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self { addresses }
    }

    /// Returns the configured addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }
}

#[async_trait]
impl ClusterDiscovery for StaticAddressDiscovery {
    async fn discover(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.addresses.clone())
    }
}

impl<T> From<T> for StaticAddressDiscovery
where
    T: IntoIterator<Item = SocketAddr>,
{
    fn from(addresses: T) -> Self {
        Self::new(addresses.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery_returns_addresses() {
        let addr1: SocketAddr = "192.168.1.1:5701".parse().unwrap();
        let addr2: SocketAddr = "192.168.1.2:5701".parse().unwrap();

        let discovery: StaticAddressDiscovery = [addr1, addr2].into();
        assert_eq!(discovery.discover().await.unwrap(), vec![addr1, addr2]);
        assert_eq!(discovery.addresses().len(), 2);
    }

    #[tokio::test]
    async fn test_static_discovery_empty() {
        let discovery = StaticAddressDiscovery::new(Vec::new());
        assert!(discovery.discover().await.unwrap().is_empty());
    }
}
