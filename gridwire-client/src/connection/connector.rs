//! Transport seam: opening a byte stream to a member.

use std::net::SocketAddr;

use async_trait::async_trait;
use gridwire_core::{GridError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};

use crate::config::SocketConfig;

/// A bidirectional byte stream to a member.
pub trait MemberStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> MemberStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed stream returned by a [`Connector`].
pub type BoxedStream = Box<dyn MemberStream>;

/// Opens streams to cluster members.
///
/// The default [`TcpConnector`] opens plain TCP sockets; TLS or tunnelled
/// transports plug in by implementing this trait.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Opens a stream to `address`.
    async fn connect(&self, address: SocketAddr, socket: &SocketConfig) -> Result<BoxedStream>;
}

/// Plain TCP connector applying the configured socket options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Creates a new TCP connector.
    pub fn new() -> Self {
        Self
    }

    async fn open(address: SocketAddr, options: &SocketConfig) -> std::io::Result<TcpStream> {
        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        socket.set_keepalive(options.keep_alive())?;
        if let Some(size) = options.send_buffer_size() {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = options.recv_buffer_size() {
            socket.set_recv_buffer_size(size)?;
        }
        if options.linger().is_some() {
            socket.set_linger(options.linger())?;
        }

        let stream = socket.connect(address).await?;
        stream.set_nodelay(options.tcp_nodelay())?;
        Ok(stream)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: SocketAddr, socket: &SocketConfig) -> Result<BoxedStream> {
        let stream = Self::open(address, socket).await.map_err(|e| {
            GridError::Connection(format!("failed to connect to {}: {}", address, e))
        })?;

        tracing::debug!(address = %address, "established connection");
        Ok(Box::new(stream))
    }
}
