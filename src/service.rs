//! Long-running capture service.
//!
//! Binds the WebSocket server, waits for the extension, then answers
//! `capture.trigger` events until the extension disconnects. Each trigger is
//! acknowledged immediately; the session runs in the background and reports
//! back through `capture.*` notifications.
//!
//! [`ConnectedService::stop`] cancels a running session and waits for its
//! page restore before closing the connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::capture::{CaptureEvent, CaptureOptions, Orchestrator};
use crate::error::{Error, Result};
use crate::host::ExtensionHost;
use crate::protocol::{Event, EventReply, Notification, ParsedEvent};
use crate::transport::connection::DEFAULT_COMMAND_TIMEOUT;
use crate::transport::server::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::{Connection, PendingServer, ReadyData};

// ============================================================================
// Constants
// ============================================================================

/// Default port the extension connects to.
pub const DEFAULT_PORT: u16 = 9223;

/// Trigger event method.
const TRIGGER_METHOD: &str = "capture.trigger";

// ============================================================================
// ServiceConfig
// ============================================================================

/// Configuration for [`CaptureService`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Address to bind.
    pub ip: IpAddr,
    /// Port to bind; `0` picks a free one.
    pub port: u16,
    /// Time to wait for the extension to connect.
    pub connect_timeout: Duration,
    /// Per-command timeout.
    pub command_timeout: Duration,
    /// Capture session options.
    pub capture: CaptureOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            capture: CaptureOptions::default(),
        }
    }
}

impl ServiceConfig {
    /// Creates the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    /// Sets the bind port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the command timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the capture options.
    #[inline]
    #[must_use]
    pub fn with_capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }

    /// Checks values that would make every session fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() {
            return Err(Error::config("command timeout must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be positive"));
        }
        if self.capture.filename.trim().is_empty() {
            return Err(Error::config("output filename is empty"));
        }
        Ok(())
    }
}

// ============================================================================
// CaptureService
// ============================================================================

/// A bound service waiting for the extension.
pub struct CaptureService {
    server: PendingServer,
    config: ServiceConfig,
}

impl CaptureService {
    /// Validates `config` and binds the WebSocket server.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `config` is invalid
    /// - [`Error::Io`] if the address cannot be bound
    pub async fn bind(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let server = PendingServer::bind(config.ip, config.port)
            .await?
            .with_connect_timeout(config.connect_timeout)
            .with_command_timeout(config.command_timeout);

        Ok(Self { server, config })
    }

    /// Returns the URL the extension should connect to.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        self.server.ws_url()
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Waits for the extension and wires up trigger handling.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the extension does not connect in time
    /// - [`Error::Protocol`] if the READY handshake fails
    pub async fn accept(self) -> Result<ConnectedService> {
        let (connection, ready) = self.server.accept().await?;

        info!(
            extension = %ready.extension,
            version = %ready.version,
            "Extension connected"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let host = Arc::new(ExtensionHost::new(connection.clone()));
        let orchestrator =
            Arc::new(Orchestrator::new(host, self.config.capture).with_events(events_tx));

        tokio::spawn(forward_events(connection.clone(), events_rx));

        let running = RunningSession::default();
        let handler_orchestrator = Arc::clone(&orchestrator);
        let handler_running = Arc::clone(&running);
        connection.set_event_handler(Box::new(move |event| {
            handle_event(&handler_orchestrator, &handler_running, event)
        }));

        Ok(ConnectedService {
            connection,
            ready,
            orchestrator,
            running,
        })
    }
}

impl fmt::Debug for CaptureService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureService")
            .field("addr", &self.server.local_addr())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// ConnectedService
// ============================================================================

/// Abort handle of the most recently spawned session task.
type RunningSession = Arc<Mutex<Option<AbortHandle>>>;

/// A service attached to a live extension.
pub struct ConnectedService {
    connection: Connection,
    ready: ReadyData,
    orchestrator: Arc<Orchestrator<ExtensionHost>>,
    running: RunningSession,
}

impl ConnectedService {
    /// Returns the extension's READY data.
    #[inline]
    #[must_use]
    pub fn ready(&self) -> &ReadyData {
        &self.ready
    }

    /// Returns the orchestrator serving triggers.
    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator<ExtensionHost>> {
        &self.orchestrator
    }

    /// Serves triggers until the extension disconnects.
    pub async fn serve(&self) {
        self.connection.closed().await;
        self.connection.clear_event_handler();
        info!("Extension disconnected");
    }

    /// Cancels the running session, waits up to `timeout` for its page
    /// restore, then closes the connection.
    ///
    /// Returns `false` if a session still held the page when `timeout`
    /// ran out.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.connection.clear_event_handler();
        if let Some(running) = self.running.lock().take() {
            running.abort();
        }

        let idle = tokio::time::timeout(timeout, self.orchestrator.session_lock().idle())
            .await
            .is_ok();
        if !idle {
            warn!(?timeout, "Session still restoring the page at shutdown");
        }

        self.shutdown();
        idle
    }

    /// Closes the connection.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

impl fmt::Debug for ConnectedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedService")
            .field("ready", &self.ready)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Answers one extension event.
fn handle_event(
    orchestrator: &Arc<Orchestrator<ExtensionHost>>,
    running: &RunningSession,
    event: Event,
) -> Option<EventReply> {
    match event.parse() {
        ParsedEvent::CaptureTrigger { tab_id } => match orchestrator.try_begin() {
            Ok(session) => {
                debug!(token = %session.token(), ?tab_id, "Capture triggered");

                let orchestrator = Arc::clone(orchestrator);
                let task = tokio::spawn(async move {
                    // Outcome is reported through events.
                    let _ = orchestrator.run_session(session).await;
                });
                *running.lock() = Some(task.abort_handle());

                Some(EventReply::started(event.id, TRIGGER_METHOD))
            }
            Err(e) => {
                warn!(error = %e, "Capture trigger rejected");
                Some(EventReply::rejected(event.id, TRIGGER_METHOD, e.to_string()))
            }
        },

        ParsedEvent::Unknown { method, .. } => {
            debug!(%method, "Ignoring unknown event");
            None
        }
    }
}

/// Relays session events to the extension as notifications.
async fn forward_events(connection: Connection, mut events: mpsc::UnboundedReceiver<CaptureEvent>) {
    while let Some(event) = events.recv().await {
        let notification = Notification::new(event.method(), event.params());
        if connection.notify(notification).is_err() {
            debug!("Connection closed, dropping capture events");
            break;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();

        assert_eq!(config.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ServiceConfig::new()
            .with_port(0)
            .with_command_timeout(Duration::from_secs(5))
            .with_capture(CaptureOptions::new().with_filename("page.png"));

        assert_eq!(config.port, 0);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.capture.filename, "page.png");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ServiceConfig::new().with_command_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_blank_filename() {
        let config = ServiceConfig::new().with_capture(CaptureOptions::new().with_filename("  "));
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_bind_reports_url() {
        let service = CaptureService::bind(ServiceConfig::new().with_port(0))
            .await
            .expect("bind");

        assert!(service.port() > 0);
        assert_eq!(service.ws_url(), format!("ws://127.0.0.1:{}", service.port()));
    }
}
