//! Host platform abstraction.
//!
//! The capture pipeline never talks to a browser directly. Everything it
//! needs from the platform goes through [`CaptureHost`]:
//!
//! | Operation | Platform call |
//! |-----------|---------------|
//! | [`active_tab`](CaptureHost::active_tab) | `tabs.query({active, currentWindow})` |
//! | [`execute_script`](CaptureHost::execute_script) | `scripting.executeScript` (isolated world) |
//! | [`capture_visible`](CaptureHost::capture_visible) | `tabs.captureVisibleTab` |
//! | [`download`](CaptureHost::download) | `downloads.download` |
//!
//! [`ExtensionHost`] implements the trait over the WebSocket protocol.

// ============================================================================
// Submodules
// ============================================================================

/// `CaptureHost` backed by the companion extension.
pub mod extension;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::capture::ImagePayload;
use crate::error::Result;
use crate::identifiers::TabId;

// ============================================================================
// Re-exports
// ============================================================================

pub use extension::ExtensionHost;

// ============================================================================
// PageScript
// ============================================================================

/// A named script to run inside the page.
///
/// `source` is a function body; `args` are exposed to it as `arguments`.
/// The name identifies the script in logs and lets hosts route it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageScript {
    /// Stable script name, e.g. `stabilizer.prepare`.
    pub name: &'static str,
    /// JavaScript function body.
    pub source: &'static str,
    /// Script arguments.
    pub args: Vec<Value>,
}

impl PageScript {
    /// Creates a script invocation.
    #[inline]
    #[must_use]
    pub fn new(name: &'static str, source: &'static str, args: Vec<Value>) -> Self {
        Self { name, source, args }
    }
}

// ============================================================================
// CaptureHost
// ============================================================================

/// Operations the capture pipeline needs from its host platform.
#[async_trait]
pub trait CaptureHost: Send + Sync {
    /// Returns the active tab of the focused window, if any.
    async fn active_tab(&self) -> Result<Option<TabId>>;

    /// Runs a script in the page, isolated from page scripts.
    ///
    /// Returns the script's return value.
    async fn execute_script(&self, tab: TabId, script: &PageScript) -> Result<Value>;

    /// Captures the visible viewport of `tab` as PNG bytes.
    ///
    /// Quota rejections must surface as [`Error::RateLimited`](crate::Error::RateLimited).
    async fn capture_visible(&self, tab: TabId) -> Result<Vec<u8>>;

    /// Hands a finished image to the platform's download sink.
    async fn download(&self, payload: &ImagePayload) -> Result<()>;
}
