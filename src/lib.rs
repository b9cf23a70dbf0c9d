//! Scrollshot - full-page screenshots from viewport captures.
//!
//! Browsers only screenshot what is visible. This crate produces a single
//! image of an entire page by freezing the page layout, stepping a virtual
//! scroll position through it one viewport at a time, capturing each step
//! and stitching the frames together.
//!
//! # Architecture
//!
//! The service follows a client-server model:
//!
//! - **Local End (Rust)**: Runs capture sessions, composes and encodes images
//! - **Remote End (Extension)**: Executes scripts, captures the visible tab,
//!   downloads files and sends trigger events
//!
//! Key design principles:
//!
//! - Every page mutation records its own inverse; restore always runs
//! - Only one capture session at a time, tagged by a [`SessionToken`]
//! - Rate-limited captures back off exponentially
//! - The pipeline talks to the browser only through [`CaptureHost`]
//!
//! # Quick Start
//!
//! ```no_run
//! use scrollshot::{CaptureService, Result, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = CaptureService::bind(ServiceConfig::new()).await?;
//!     println!("Point the extension at {}", service.ws_url());
//!
//!     // Answer capture triggers until the extension disconnects
//!     service.accept().await?.serve().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`capture`] | Stabilize, capture, stitch, deliver |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | [`CaptureHost`] trait and the extension-backed host |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | WebSocket message types (internal) |
//! | [`service`] | Trigger-driven capture service |
//! | [`transport`] | WebSocket transport layer (internal) |

// ============================================================================
// Modules
// ============================================================================

/// The capture pipeline.
///
/// - [`Orchestrator`] - Runs one session end to end
/// - [`Stabilizer`] - Freezes and restores the page
/// - [`FrameCapturer`] - Captures with backoff
pub mod capture;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Browser capabilities the pipeline depends on.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// WebSocket protocol message types.
///
/// Internal module defining command/response/event structures.
pub mod protocol;

/// Trigger-driven capture service.
pub mod service;

/// WebSocket transport layer.
///
/// Internal module handling WebSocket server and connection management.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Capture types
pub use capture::{
    CaptureEvent, CaptureOptions, CaptureOutcome, Frame, FrameCapturer, ImagePayload,
    Orchestrator, PageMetrics, RetryPolicy, SessionLock, StabilizedPage, Stabilizer,
};

// Error types
pub use error::{Error, Result};

// Host types
pub use host::{CaptureHost, ExtensionHost, PageScript};

// Identifier types
pub use identifiers::{RequestId, SessionToken, TabId};

// Service types
pub use service::{CaptureService, ConnectedService, ServiceConfig};
