//! Visible-viewport capture with rate-limit backoff.

// ============================================================================
// Imports
// ============================================================================

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::host::CaptureHost;
use crate::identifiers::TabId;

use super::options::RetryPolicy;

// ============================================================================
// Frame
// ============================================================================

/// One captured viewport image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the scroll sequence.
    pub index: usize,
    /// PNG-encoded image at the device's native pixel scale.
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(index: usize, bytes: Vec<u8>) -> Self {
        Self { index, bytes }
    }
}

// ============================================================================
// FrameCapturer
// ============================================================================

/// Captures the visible viewport, backing off on rate-limit rejections.
///
/// Only [`Error::RateLimited`] is retried. Everything else propagates
/// on the first failure.
pub struct FrameCapturer<'h, H: ?Sized> {
    host: &'h H,
    retry: RetryPolicy,
}

impl<'h, H: CaptureHost + ?Sized> FrameCapturer<'h, H> {
    /// Creates a capturer.
    #[inline]
    #[must_use]
    pub fn new(host: &'h H, retry: RetryPolicy) -> Self {
        Self { host, retry }
    }

    /// Captures the visible viewport of `tab`.
    ///
    /// # Errors
    ///
    /// - [`Error::RateLimitExceeded`] after `max_retries + 1` rejected attempts
    /// - any non-rate-limit error from the host, unchanged
    pub async fn capture_visible(&self, tab: TabId) -> Result<Vec<u8>> {
        let mut attempt = 0u32;

        loop {
            match self.host.capture_visible(tab).await {
                Ok(bytes) => {
                    debug!(tab_id = %tab, attempt, bytes = bytes.len(), "Viewport captured");
                    return Ok(bytes);
                }

                Err(e) if e.is_rate_limited() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        tab_id = %tab,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Capture rate limited, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }

                Err(e) if e.is_rate_limited() => {
                    return Err(Error::RateLimitExceeded {
                        attempts: attempt + 1,
                    });
                }

                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
