//! Error types for scrollshot.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use scrollshot::{Error, Result};
//!
//! async fn example(orchestrator: &Orchestrator<impl CaptureHost>) -> Result<()> {
//!     match orchestrator.run().await {
//!         Err(Error::SessionActive { .. }) => println!("busy"),
//!         other => { other?; }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Pipeline | [`Error::NoTarget`], [`Error::CaptureStep`], [`Error::Composition`], [`Error::Restore`] |
//! | Rate limiting | [`Error::RateLimited`], [`Error::RateLimitExceeded`] |
//! | Session | [`Error::SessionActive`], [`Error::InvalidMetrics`] |
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::ScriptError`], [`Error::TabNotFound`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Image`], [`Error::Base64`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use base64::DecodeError;
use image::ImageError;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{RequestId, SessionToken, TabId};

// ============================================================================
// Constants
// ============================================================================

/// Marker the browser puts in `captureVisibleTab` quota rejections.
const RATE_LIMIT_MARKER: &str = "max_capture_visible_tab_calls_per_second";

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Pipeline Errors
    // ========================================================================
    /// No active tab to capture.
    ///
    /// Raised before any page mutation, so nothing needs restoring.
    #[error("No active tab to capture")]
    NoTarget,

    /// A scroll/capture step failed.
    ///
    /// Not retried; aborts the remaining steps.
    #[error("Capture step {step} failed: {source}")]
    CaptureStep {
        /// Zero-based step index.
        step: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Frames could not be composited.
    #[error("Composition error: {message}")]
    Composition {
        /// Description of the composition failure.
        message: String,
    },

    /// Page restoration failed.
    ///
    /// Logged and reported as a warning, never propagated out of a run.
    #[error("Restore error: {message}")]
    Restore {
        /// Description of the restore failure.
        message: String,
    },

    // ========================================================================
    // Rate Limiting
    // ========================================================================
    /// The browser rejected a capture call as too frequent.
    #[error("Capture rate limited: {message}")]
    RateLimited {
        /// Message from the browser.
        message: String,
    },

    /// Capture kept being rate limited after all retries.
    #[error("Capture still rate limited after {attempts} attempts")]
    RateLimitExceeded {
        /// Total attempts made, including the first.
        attempts: u32,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Another capture session holds the lock.
    #[error("Capture session {token} is already active")]
    SessionActive {
        /// Token of the session holding the lock.
        token: SessionToken,
    },

    /// Page metrics cannot drive a capture.
    #[error("Invalid page metrics: {message}")]
    InvalidMetrics {
        /// Description of the bad metrics.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection timeout waiting for the extension.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected response.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// In-page script failed.
    #[error("Script error: {message}")]
    ScriptError {
        /// Error message from script execution.
        message: String,
    },

    /// Tab no longer exists.
    #[error("Tab not found: {tab_id}")]
    TabNotFound {
        /// The missing tab ID.
        tab_id: TabId,
    },

    /// Command request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Image decode/encode error.
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Base64 decode error.
    #[error("Base64 error: {0}")]
    Base64(#[from] DecodeError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a capture step error.
    #[inline]
    pub fn capture_step(step: usize, source: Error) -> Self {
        Self::CaptureStep {
            step,
            source: Box::new(source),
        }
    }

    /// Creates a composition error.
    #[inline]
    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    /// Creates a restore error.
    #[inline]
    pub fn restore(message: impl Into<String>) -> Self {
        Self::Restore {
            message: message.into(),
        }
    }

    /// Creates a rate limited error.
    #[inline]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Creates an invalid metrics error.
    #[inline]
    pub fn invalid_metrics(message: impl Into<String>) -> Self {
        Self::InvalidMetrics {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a script error.
    #[inline]
    pub fn script_error(message: impl Into<String>) -> Self {
        Self::ScriptError {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Classifies an error reported by the extension.
    ///
    /// `code` is the protocol error code and `message` the human-readable
    /// text. Quota rejections from `captureVisibleTab` become
    /// [`Error::RateLimited`]; missing tabs become [`Error::TabNotFound`]
    /// when the tab is known.
    pub fn from_remote(code: &str, message: &str, tab_id: Option<TabId>) -> Self {
        let code_lower = code.to_lowercase();
        let message_lower = message.to_lowercase();

        if code_lower.contains(RATE_LIMIT_MARKER) || message_lower.contains(RATE_LIMIT_MARKER) {
            return Self::rate_limited(message);
        }

        match (code_lower.as_str(), tab_id) {
            ("no such tab", Some(tab_id)) => Self::TabNotFound { tab_id },
            ("script error" | "javascript error", _) => Self::script_error(message),
            _ => Self::protocol(message),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a single rate-limit rejection.
    ///
    /// Only this variant is retried by the frame capturer.
    #[inline]
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error may succeed on a later attempt.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::SessionActive { .. }
                | Self::ConnectionTimeout { .. }
                | Self::RequestTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_capture_step_display_includes_source() {
        let err = Error::capture_step(1, Error::script_error("tab navigated"));
        assert_eq!(
            err.to_string(),
            "Capture step 1 failed: Script error: tab navigated"
        );
    }

    #[test]
    fn test_from_remote_rate_limit() {
        let err = Error::from_remote(
            "unknown error",
            "This request exceeds the MAX_CAPTURE_VISIBLE_TAB_CALLS_PER_SECOND quota.",
            None,
        );
        assert!(err.is_rate_limited());

        let err = Error::from_remote("MAX_CAPTURE_VISIBLE_TAB_CALLS_PER_SECOND", "", None);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_from_remote_other() {
        let tab = TabId::new(4);
        assert!(matches!(
            Error::from_remote("no such tab", "gone", tab),
            Error::TabNotFound { .. }
        ));
        assert!(matches!(
            Error::from_remote("script error", "boom", tab),
            Error::ScriptError { .. }
        ));
        assert!(matches!(
            Error::from_remote("unknown command", "nope", tab),
            Error::Protocol { .. }
        ));
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::connection_timeout(1000).is_connection_error());
        assert!(!Error::NoTarget.is_connection_error());
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connection_timeout(1000).is_timeout());
        assert!(Error::request_timeout(RequestId::generate(), 30_000).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
        assert!(!Error::rate_limited("slow down").is_timeout());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::rate_limited("slow down").is_recoverable());
        assert!(!Error::RateLimitExceeded { attempts: 6 }.is_recoverable());
        assert!(!Error::composition("no frames").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
