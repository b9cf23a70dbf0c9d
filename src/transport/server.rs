//! WebSocket server the capture extension connects to.
//!
//! # Connection Flow
//!
//! 1. Rust binds a WebSocket server to `127.0.0.1:PORT`
//! 2. The extension (configured with that port) connects
//! 3. The extension sends a READY message with its name and version
//! 4. Connection established, ready for commands and trigger events

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::Connection;
use super::connection::{DEFAULT_COMMAND_TIMEOUT, ReadyData};

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for the extension to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// PendingServer
// ============================================================================

/// A WebSocket server that is bound but not yet connected.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use scrollshot::transport::PendingServer;
///
/// let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// println!("point the extension at {}", server.ws_url());
///
/// let (connection, ready) = server.accept().await?;
/// ```
pub struct PendingServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the server is bound to.
    addr: SocketAddr,
    /// Time to wait for the extension in [`accept`](Self::accept).
    connect_timeout: Duration,
    /// Per-request timeout handed to the [`Connection`].
    command_timeout: Duration,
}

impl PendingServer {
    /// Binds a WebSocket server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let addr = listener.local_addr()?;

        debug!(%addr, "WebSocket server bound");

        Ok(Self {
            listener,
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Sets the time to wait for the extension to connect.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the per-request timeout of the accepted connection.
    #[must_use]
    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the WebSocket URL for this server.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Accepts a connection from the extension and completes the handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if nothing connects in time
    /// - [`Error::Connection`] if WebSocket upgrade fails
    /// - [`Error::Protocol`] if READY handshake fails
    pub async fn accept(self) -> Result<(Connection, ReadyData)> {
        let (stream, peer) = timeout(self.connect_timeout, self.listener.accept())
            .await
            .map_err(|_| Error::connection_timeout(self.connect_timeout.as_millis() as u64))??;

        debug!(%peer, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        info!(port = self.addr.port(), "WebSocket connection established");

        let connection = Connection::new(ws_stream, self.command_timeout);
        let ready_data = connection.wait_ready().await?;

        Ok((connection, ready_data))
    }
}

// ============================================================================
// Tests
// ============================================================================
