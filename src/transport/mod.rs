//! WebSocket transport layer.
//!
//! This module handles communication between local end (Rust) and
//! remote end (capture extension) via WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Service (Rust) │                              │  Extension      │
//! │                 │         WebSocket            │  (Background)   │
//! │  PendingServer  │◄────────────────────────────►│                 │
//! │  → Connection   │      localhost:PORT          │  WebSocket      │
//! │                 │                              │  Client         │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `PendingServer::bind` - Bind to localhost
//! 2. `PendingServer::accept` - Wait for extension to connect and send READY
//! 3. `Connection` - Send commands, receive responses/events, push notifications
//! 4. `Connection::closed` - Resolves when the extension goes away

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// WebSocket server binding and acceptance.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, EventHandler, ReadyData};
pub use server::PendingServer;
