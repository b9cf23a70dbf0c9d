//! WebSocket protocol message types.
//!
//! This module defines the message format for communication between
//! local end (Rust) and remote end (Extension).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Local → Remote | Command request |
//! | `Response` | Remote → Local | Command response |
//! | `Event` | Remote → Local | Capture trigger |
//! | `EventReply` | Local → Remote | Trigger acknowledgment |
//! | `Notification` | Local → Remote | Session progress and outcome |
//!
//! # Command Naming
//!
//! Commands follow `module.methodName` format:
//!
//! - `tabs.captureVisible`
//! - `script.execute`
//! - `downloads.download`

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions organized by module.
pub mod command;

/// Event, reply and notification types.
pub mod event;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, DownloadsCommand, ScriptCommand, TabsCommand};
pub use event::{Event, EventReply, Notification, ParsedEvent};
pub use request::{Request, Response, ResponseType};
