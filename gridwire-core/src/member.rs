//! Cluster member descriptors as carried on the wire.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use uuid::Uuid;

/// Host and port a member advertises.
///
/// The host may be a name, so it is resolved by the client before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Creates an address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the socket address when the host is an IP literal.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Codebase version of a member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl MemberVersion {
    /// Creates a version triple.
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for MemberVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A member of the cluster as reported in a members view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Unique identifier of the member.
    pub uuid: Uuid,
    /// Address the member accepts client connections on.
    pub address: Address,
    /// Whether this member owns no partitions.
    pub lite_member: bool,
    /// Custom attributes associated with the member.
    pub attributes: HashMap<String, String>,
    /// Member codebase version.
    pub version: MemberVersion,
}

impl MemberInfo {
    /// Creates a data member without attributes.
    pub fn new(uuid: Uuid, address: Address) -> Self {
        Self {
            uuid,
            address,
            lite_member: false,
            attributes: HashMap::new(),
            version: MemberVersion::default(),
        }
    }

    /// Returns the member's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the member's advertised address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns whether this is a lite member.
    pub fn is_lite_member(&self) -> bool {
        self.lite_member
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member[uuid={}, address={}]", self.uuid, self.address)?;
        if self.lite_member {
            write!(f, " lite")?;
        }
        Ok(())
    }
}
