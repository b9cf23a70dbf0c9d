//! Event, event reply and notification message types.
//!
//! Events flow from the remote end (extension) to the local end (Rust);
//! notifications flow the other way and need no reply.
//!
//! # Messages
//!
//! | Method | Direction | Purpose |
//! |--------|-----------|---------|
//! | `capture.trigger` | Remote → Local | User asked for a capture |
//! | `capture.started` | Local → Remote | Session began |
//! | `capture.completed` | Local → Remote | Image delivered |
//! | `capture.failed` | Local → Remote | Session failed, no image |
//! | `capture.warning` | Local → Remote | Page restore was incomplete |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::identifiers::{RequestId, TabId};

// ============================================================================
// Event
// ============================================================================

/// An event notification from remote end to local end.
///
/// # Format
///
/// ```json
/// {
///   "id": "event-uuid",
///   "type": "event",
///   "method": "module.eventName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Unique identifier for EventReply correlation.
    pub id: RequestId,

    /// Event type marker (always "event").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    #[serde(default)]
    pub params: Value,
}

impl Event {
    /// Returns the module name from the method.
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        match self.method.as_str() {
            "capture.trigger" => ParsedEvent::CaptureTrigger {
                tab_id: self
                    .params
                    .get("tabId")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok())
                    .and_then(TabId::new),
            },

            _ => ParsedEvent::Unknown {
                method: self.method.clone(),
                params: self.params.clone(),
            },
        }
    }
}

// ============================================================================
// EventReply
// ============================================================================

/// A reply from local end to remote end for an event.
///
/// # Format
///
/// ```json
/// {
///   "id": "event-uuid",
///   "replyTo": "capture.trigger",
///   "result": { "started": true }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct EventReply {
    /// Matches the event's ID.
    pub id: RequestId,

    /// Event method being replied to.
    #[serde(rename = "replyTo")]
    pub reply_to: String,

    /// Reply payload.
    pub result: Value,
}

impl EventReply {
    /// Creates a new event reply.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, reply_to: impl Into<String>, result: Value) -> Self {
        Self {
            id,
            reply_to: reply_to.into(),
            result,
        }
    }

    /// Acknowledges that a capture has started.
    #[inline]
    #[must_use]
    pub fn started(id: RequestId, reply_to: impl Into<String>) -> Self {
        Self::new(id, reply_to, json!({ "started": true }))
    }

    /// Declines a capture request.
    #[inline]
    #[must_use]
    pub fn rejected(id: RequestId, reply_to: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            id,
            reply_to,
            json!({ "started": false, "reason": reason.into() }),
        )
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A fire-and-forget message from local end to remote end.
///
/// # Format
///
/// ```json
/// {
///   "type": "notification",
///   "method": "capture.completed",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Message type marker (always "notification").
    #[serde(rename = "type")]
    pub message_type: &'static str,

    /// Notification name in `module.eventName` format.
    pub method: String,

    /// Notification data.
    pub params: Value,
}

impl Notification {
    /// Creates a new notification.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            message_type: "notification",
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Parsed event types for type-safe handling.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    /// User asked for a full-page capture.
    CaptureTrigger {
        /// Tab the trigger came from, if the extension knows it.
        /// Absent, zero or out-of-range ids parse as `None`.
        tab_id: Option<TabId>,
    },

    /// Unknown event type.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================
