//! The full-page capture pipeline.
//!
//! | Module | Role |
//! |--------|------|
//! | [`stabilizer`] | Freeze the page, virtual scroll, restore |
//! | [`capturer`] | Visible-viewport capture with backoff |
//! | [`compositor`] | Stitch frames into one image |
//! | [`emitter`] | Encode and deliver the image |
//! | [`orchestrator`] | Run one session end to end |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scrollshot::capture::{CaptureOptions, Orchestrator};
//! use scrollshot::host::ExtensionHost;
//! use scrollshot::transport::PendingServer;
//!
//! # async fn example() -> scrollshot::Result<()> {
//! let server = PendingServer::bind([127, 0, 0, 1].into(), 0).await?;
//! let (connection, _ready) = server.accept().await?;
//!
//! let host = Arc::new(ExtensionHost::new(connection));
//! let orchestrator = Orchestrator::new(host, CaptureOptions::default());
//! let outcome = orchestrator.run().await?;
//! println!("{}x{}", outcome.width, outcome.height);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

pub mod capturer;
pub mod compositor;
pub mod emitter;
pub mod options;
pub mod orchestrator;
pub mod stabilizer;

// ============================================================================
// Re-exports
// ============================================================================

pub use capturer::{Frame, FrameCapturer};
pub use compositor::{DrawOp, plan_draws, stitch};
pub use emitter::{ImagePayload, deliver, encode};
pub use options::{CaptureOptions, RetryPolicy};
pub use orchestrator::{
    ActiveSession, CaptureEvent, CaptureOutcome, Orchestrator, ScrollPlan, SessionLock,
};
pub use stabilizer::{PageMetrics, RestoreReport, StabilizedPage, Stabilizer};
