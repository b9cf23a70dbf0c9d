//! Capture configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use scrollshot::{CaptureOptions, RetryPolicy};
//!
//! let options = CaptureOptions::new()
//!     .with_settle_delay(Duration::from_millis(500))
//!     .with_retry(RetryPolicy::new(Duration::from_millis(400), 3))
//!     .with_filename("page.png");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default settle delay between a scroll and its capture.
///
/// Also keeps the loop under the browser's per-second capture quota.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(800);

/// Default base delay of the rate-limit backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(800);

/// Default number of retries after a rate-limit rejection.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default output filename.
pub const DEFAULT_FILENAME: &str = "screenshot.png";

// ============================================================================
// RetryPolicy
// ============================================================================

/// Exponential backoff for rate-limited captures.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BACKOFF_BASE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[inline]
    #[must_use]
    pub const fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Returns the wait after failed attempt `attempt` (0-based).
    ///
    /// Saturates instead of overflowing for large attempt counts.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Returns the total number of attempts the policy allows.
    #[inline]
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

// ============================================================================
// CaptureOptions
// ============================================================================

/// Options for one capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Wait between scrolling and capturing each step.
    pub settle_delay: Duration,
    /// Backoff for rate-limited captures.
    pub retry: RetryPolicy,
    /// Suggested output filename.
    pub filename: String,
    /// Ask the user where to save.
    pub save_as: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            retry: RetryPolicy::default(),
            filename: DEFAULT_FILENAME.to_string(),
            save_as: true,
        }
    }
}

impl CaptureOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settle delay.
    #[inline]
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the output filename.
    #[inline]
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Enables or disables the "save as" prompt.
    #[inline]
    #[must_use]
    pub fn with_save_as(mut self, save_as: bool) -> Self {
        self.save_as = save_as;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CaptureOptions::default();
        assert_eq!(options.settle_delay, Duration::from_millis(800));
        assert_eq!(options.retry.base_delay, Duration::from_millis(800));
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.filename, "screenshot.png");
        assert!(options.save_as);
    }

    #[test]
    fn test_builder() {
        let options = CaptureOptions::new()
            .with_settle_delay(Duration::ZERO)
            .with_retry(RetryPolicy::new(Duration::from_millis(10), 2))
            .with_filename("page.png")
            .with_save_as(false);

        assert_eq!(options.settle_delay, Duration::ZERO);
        assert_eq!(options.retry.max_attempts(), 3);
        assert_eq!(options.filename, "page.png");
        assert!(!options.save_as);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(Duration::from_millis(800), 5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(800));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1600));
        assert_eq!(policy.delay_for(4), Duration::from_millis(12_800));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(Duration::from_secs(1), u32::MAX);
        assert_eq!(policy.delay_for(64), Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(policy.max_attempts(), u32::MAX);
    }
}
