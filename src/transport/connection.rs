//! WebSocket connection and event loop.
//!
//! This module handles the WebSocket connection to the capture extension,
//! including request/response correlation and event routing.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming messages from extension (responses, events)
//! - Outgoing commands and notifications from the Rust API
//! - Request/response correlation by UUID
//! - Event handler callbacks

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Event, EventReply, Notification, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

/// Timeout for READY handshake.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Response>>>;

/// Write half of the extension socket.
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Read half of the extension socket.
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Event handler callback type.
///
/// Called for each event received from the extension.
/// Return `Some(EventReply)` to send a reply.
pub type EventHandler = Box<dyn Fn(Event) -> Option<EventReply> + Send + Sync>;

// ============================================================================
// ReadyData
// ============================================================================

/// Data received in the READY handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyData {
    /// Extension name as reported by the remote end.
    pub extension: String,
    /// Extension version.
    pub version: String,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Send a notification without waiting.
    Notify(Notification),
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to the capture extension.
///
/// Cheap to clone; all clones share the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Event handler (shared with event loop).
    event_handler: Arc<Mutex<Option<EventHandler>>>,
    /// Flips to `true` when the event loop terminates.
    closed_rx: watch::Receiver<bool>,
    /// Per-request timeout.
    command_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a new connection from a WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub(crate) fn new(ws_stream: WebSocketStream<TcpStream>, command_timeout: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let event_handler: Arc<Mutex<Option<EventHandler>>> = Arc::new(Mutex::new(None));

        let (sink, source) = ws_stream.split();
        let event_loop = EventLoop {
            sink,
            correlation: Arc::clone(&correlation),
            event_handler: Arc::clone(&event_handler),
        };
        tokio::spawn(event_loop.run(source, command_rx, closed_tx));

        Self {
            command_tx,
            correlation,
            event_handler,
            closed_rx,
            command_timeout,
        }
    }

    /// Waits for the READY handshake message.
    ///
    /// The extension sends READY with nil UUID immediately after connecting.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if READY not received within 30s
    /// - [`Error::ConnectionClosed`] if connection closes before READY
    pub async fn wait_ready(&self) -> Result<ReadyData> {
        let (tx, rx) = oneshot::channel();

        self.correlation.lock().insert(RequestId::ready(), tx);

        let response = timeout(READY_TIMEOUT, rx)
            .await
            .map_err(|_| Error::connection_timeout(READY_TIMEOUT.as_millis() as u64))??;

        let response = response?;

        let ready = ReadyData {
            extension: response.get_string("extension"),
            version: response.get_string("version"),
        };

        debug!(extension = %ready.extension, version = %ready.version, "READY handshake completed");

        Ok(ready)
    }

    /// Sets the event handler callback.
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.event_handler.lock() = Some(handler);
    }

    /// Clears the event handler.
    pub fn clear_event_handler(&self) {
        *self.event_handler.lock() = None;
    }

    /// Sends a request and waits for response with the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if connection is closed
    /// - [`Error::RequestTimeout`] if response not received within timeout
    /// - [`Error::Protocol`] if too many pending requests
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.send_with_timeout(request, self.command_timeout).await
    }

    /// Sends a request and waits for response with custom timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if connection is closed
    /// - [`Error::RequestTimeout`] if response not received within timeout
    /// - [`Error::Protocol`] if too many pending requests
    pub async fn send_with_timeout(
        &self,
        request: Request,
        request_timeout: Duration,
    ) -> Result<Response> {
        let request_id = request.id;

        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ConnectionCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Queues a notification for the extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has stopped.
    pub fn notify(&self, notification: Notification) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Notify(notification))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` once the event loop has terminated.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves when the connection has closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        // Sender dropped also means the loop is gone.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Outcome of handling one loop input.
enum Flow {
    Continue,
    Stop,
}

/// State owned by the connection task.
struct EventLoop {
    /// Write half of the socket.
    sink: WsSink,
    /// Correlation map (shared with [`Connection`]).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Event handler (shared with [`Connection`]).
    event_handler: Arc<Mutex<Option<EventHandler>>>,
}

impl EventLoop {
    /// Multiplexes socket input and API commands until either side ends.
    async fn run(
        mut self,
        mut source: WsSource,
        mut commands: mpsc::UnboundedReceiver<ConnectionCommand>,
        closed_tx: watch::Sender<bool>,
    ) {
        loop {
            let flow = tokio::select! {
                message = source.next() => self.on_socket(message).await,
                command = commands.recv() => self.on_command(command).await,
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        self.fail_pending();
        let _ = closed_tx.send(true);

        debug!("Event loop terminated");
    }

    /// Handles one frame from the extension.
    async fn on_socket(&mut self, message: Option<StdResult<Message, WsError>>) -> Flow {
        match message {
            Some(Ok(Message::Text(text))) => {
                if let Some(reply) = self.dispatch(&text) {
                    self.write_json(&reply, "event reply").await;
                }
                Flow::Continue
            }

            Some(Ok(Message::Close(_))) => {
                debug!("WebSocket closed by remote");
                Flow::Stop
            }

            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                Flow::Stop
            }

            None => {
                debug!("WebSocket stream ended");
                Flow::Stop
            }

            // Binary, Ping, Pong
            Some(Ok(_)) => Flow::Continue,
        }
    }

    /// Handles one command from the Rust API.
    async fn on_command(&mut self, command: Option<ConnectionCommand>) -> Flow {
        match command {
            Some(ConnectionCommand::Send {
                request,
                response_tx,
            }) => {
                self.send_request(request, response_tx).await;
                Flow::Continue
            }

            Some(ConnectionCommand::Notify(notification)) => {
                trace!(method = %notification.method, "Sending notification");
                self.write_json(&notification, "notification").await;
                Flow::Continue
            }

            Some(ConnectionCommand::RemoveCorrelation(request_id)) => {
                self.correlation.lock().remove(&request_id);
                debug!(%request_id, "Removed timed-out correlation");
                Flow::Continue
            }

            Some(ConnectionCommand::Shutdown) => {
                debug!("Shutdown command received");
                let _ = self.sink.close().await;
                Flow::Stop
            }

            None => {
                debug!("Command channel closed");
                Flow::Stop
            }
        }
    }

    /// Routes a text frame to its waiting request or to the event handler.
    fn dispatch(&self, text: &str) -> Option<EventReply> {
        if let Ok(response) = from_str::<Response>(text) {
            match self.correlation.lock().remove(&response.id) {
                Some(tx) => {
                    let _ = tx.send(Ok(response));
                }
                None => warn!(id = %response.id, "Response for unknown request"),
            }
            return None;
        }

        if let Ok(event) = from_str::<Event>(text) {
            let handler = self.event_handler.lock();
            return match handler.as_ref() {
                Some(handler) => handler(event),
                None => {
                    debug!(method = %event.method, "Event dropped, no handler installed");
                    None
                }
            };
        }

        warn!(text = %text, "Failed to parse incoming message");
        None
    }

    /// Registers and writes a request.
    async fn send_request(
        &mut self,
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    ) {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Registered first so a fast reply always finds its sender.
        self.correlation.lock().insert(request_id, response_tx);

        if let Err(e) = self.sink.send(Message::Text(json.into())).await
            && let Some(tx) = self.correlation.lock().remove(&request_id)
        {
            let _ = tx.send(Err(Error::connection(e.to_string())));
        }

        trace!(%request_id, "Request sent");
    }

    /// Writes a message that expects no response.
    async fn write_json<T: Serialize>(&mut self, message: &T, kind: &'static str) {
        match to_string(message) {
            Ok(json) => {
                if let Err(e) = self.sink.send(Message::Text(json.into())).await {
                    warn!(error = %e, kind, "Failed to send message");
                }
            }
            Err(e) => warn!(error = %e, kind, "Failed to serialize message"),
        }
    }

    /// Fails all pending requests with [`Error::ConnectionClosed`].
    fn fail_pending(&self) {
        let pending: Vec<_> = self.correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on close");
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
    fn test_constants() {
        assert_eq!(DEFAULT_COMMAND_TIMEOUT.as_secs(), 30);
        assert_eq!(MAX_PENDING_REQUESTS, 100);
        assert_eq!(READY_TIMEOUT.as_secs(), 30);
    }

    #[test]
    fn test_connection_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<Connection>();
    }
}
