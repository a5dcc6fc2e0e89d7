//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Create one listening socket per address family
//! - Enable address/port reuse, bind, listen with a small fixed backlog
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// The two address families a server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Also the source tag of this family's log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to create the socket.
    Socket(AddressFamily, io::Error),
    /// Failed to bind to address.
    Bind(SocketAddr, io::Error),
    /// Failed to start listening.
    Listen(SocketAddr, io::Error),
    /// Failed to accept connection.
    Accept(io::Error),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Socket(family, e) => write!(f, "{} socket creation failed: {}", family, e),
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ListenerError::Listen(addr, e) => write!(f, "Failed to listen on {}: {}", addr, e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Socket(_, e)
            | ListenerError::Bind(_, e)
            | ListenerError::Listen(_, e)
            | ListenerError::Accept(e) => Some(e),
        }
    }
}

/// A bounded TCP listener for one address family.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
pub struct Listener {
    family: AddressFamily,
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Create, bind and start listening on the configured address.
    pub async fn bind(
        family: AddressFamily,
        config: &ListenerConfig,
        backlog: u32,
        max_connections: usize,
    ) -> Result<Self, ListenerError> {
        let addr = SocketAddr::new(config.address, config.port);

        let socket = match family {
            AddressFamily::Ipv4 => TcpSocket::new_v4(),
            AddressFamily::Ipv6 => TcpSocket::new_v6(),
        }
        .map_err(|e| ListenerError::Socket(family, e))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| ListenerError::Socket(family, e))?;
        #[cfg(unix)]
        socket
            .set_reuseport(true)
            .map_err(|e| ListenerError::Socket(family, e))?;

        socket.bind(addr).map_err(|e| ListenerError::Bind(addr, e))?;
        let listener = socket.listen(backlog).map_err(|e| ListenerError::Listen(addr, e))?;

        let local_addr = listener.local_addr().map_err(|e| ListenerError::Listen(addr, e))?;
        tracing::info!(
            source = family.as_str(),
            address = %local_addr,
            backlog,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            family,
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|e| ListenerError::Accept(io::Error::other(e)))?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            source = self.family.as_str(),
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
