//! End-to-end capture sessions.
//!
//! A session runs strictly in sequence:
//!
//! 1. Acquire the session lock (one session at a time)
//! 2. Resolve the active tab
//! 3. Stabilize the page and measure it
//! 4. For each step: virtual scroll, settle, capture
//! 5. Restore the page, whatever happened in 3 and 4
//! 6. Stitch, encode and deliver
//!
//! A session future dropped between 3 and 5 (a timeout, an aborted task)
//! still restores the page: the restore is spawned on the runtime and the
//! lock stays held until it finishes.
//!
//! Progress and outcome are reported as [`CaptureEvent`]s when an event
//! channel is attached.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::host::CaptureHost;
use crate::identifiers::{SessionToken, TabId};

use super::capturer::{Frame, FrameCapturer};
use super::compositor;
use super::emitter::{self, ImagePayload};
use super::options::CaptureOptions;
use super::stabilizer::{PageMetrics, Stabilizer};

// ============================================================================
// ScrollPlan
// ============================================================================

/// Viewport-sized steps covering the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPlan {
    content_height: u32,
    viewport_height: u32,
}

impl ScrollPlan {
    /// Creates a plan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetrics`] if `viewport_height` is zero.
    pub fn new(content_height: u32, viewport_height: u32) -> Result<Self> {
        if viewport_height == 0 {
            return Err(Error::invalid_metrics("viewport height is zero"));
        }
        Ok(Self {
            content_height,
            viewport_height,
        })
    }

    /// Returns `max(1, ceil(content / viewport))`.
    #[inline]
    #[must_use]
    pub fn steps(&self) -> usize {
        self.content_height.div_ceil(self.viewport_height).max(1) as usize
    }

    /// Returns the scroll offset of `step`, clamped to the last full viewport.
    #[inline]
    #[must_use]
    pub fn offset(&self, step: usize) -> u32 {
        let max_offset = self.content_height.saturating_sub(self.viewport_height);
        let unclamped = u64::from(self.viewport_height) * step as u64;
        unclamped.min(u64::from(max_offset)) as u32
    }

    /// Iterates the offsets of every step in order.
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.steps()).map(|step| self.offset(step))
    }
}

// ============================================================================
// Session Lock
// ============================================================================

/// Admits one capture session at a time.
///
/// Cloning shares the lock.
#[derive(Clone, Default)]
pub struct SessionLock {
    active: Arc<Mutex<Option<SessionToken>>>,
    released: Arc<Notify>,
}

impl SessionLock {
    /// Creates an unlocked lock.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock under a fresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session already holds it.
    pub fn try_acquire(&self) -> Result<ActiveSession> {
        let mut active = self.active.lock();
        if let Some(token) = *active {
            return Err(Error::SessionActive { token });
        }

        let token = SessionToken::generate();
        *active = Some(token);

        Ok(ActiveSession {
            lock: self.clone(),
            token,
        })
    }

    /// Returns the token of the session holding the lock.
    #[inline]
    #[must_use]
    pub fn active(&self) -> Option<SessionToken> {
        *self.active.lock()
    }

    /// Waits until no session holds the lock.
    pub async fn idle(&self) {
        loop {
            let released = self.released.notified();
            if self.active().is_none() {
                return;
            }
            released.await;
        }
    }
}

impl fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLock")
            .field("active", &self.active())
            .finish()
    }
}

/// Proof of holding the [`SessionLock`]; releases it on drop.
#[derive(Debug)]
pub struct ActiveSession {
    lock: SessionLock,
    token: SessionToken,
}

impl ActiveSession {
    /// Returns the session token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> SessionToken {
        self.token
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        {
            let mut active = self.lock.active.lock();
            if *active == Some(self.token) {
                *active = None;
            }
        }
        self.lock.released.notify_waiters();
    }
}

// ============================================================================
// Restore Guard
// ============================================================================

/// Restores the page if a session is dropped while the page is stabilized.
///
/// Owns the [`ActiveSession`], so the lock is only released once the
/// deferred restore has run.
struct RestoreGuard<H: CaptureHost + ?Sized + 'static> {
    host: Arc<H>,
    session: Option<ActiveSession>,
    armed: Option<TabId>,
}

impl<H: CaptureHost + ?Sized + 'static> RestoreGuard<H> {
    fn new(host: Arc<H>, session: ActiveSession) -> Self {
        Self {
            host,
            session: Some(session),
            armed: None,
        }
    }

    /// Marks `tab` as possibly stabilized.
    fn arm(&mut self, tab: TabId) {
        self.armed = Some(tab);
    }

    /// Marks the page as restored.
    fn disarm(&mut self) {
        self.armed = None;
    }
}

impl<H: CaptureHost + ?Sized + 'static> Drop for RestoreGuard<H> {
    fn drop(&mut self) {
        let (Some(tab), Some(session)) = (self.armed.take(), self.session.take()) else {
            return;
        };
        let token = session.token();

        let Ok(runtime) = Handle::try_current() else {
            error!(tab_id = %tab, %token, "Capture dropped without a runtime, page left stabilized");
            return;
        };

        warn!(tab_id = %tab, %token, "Capture dropped mid-session, restoring page");
        let host = Arc::clone(&self.host);
        runtime.spawn(async move {
            match Stabilizer::new(&*host).restore(tab, token).await {
                Ok(report) if report.is_clean() => {
                    debug!(tab_id = %tab, %token, "Deferred restore done");
                }
                Ok(report) => warn!(
                    tab_id = %tab,
                    %token,
                    failures = %report.failures.join("; "),
                    "Deferred restore incomplete"
                ),
                Err(e) => warn!(tab_id = %tab, %token, error = %e, "Deferred restore failed"),
            }
            drop(session);
        });
    }
}

// ============================================================================
// Events and Outcome
// ============================================================================

/// Progress and outcome of a capture session.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The session resolved its tab and is about to touch the page.
    Started {
        /// Session token.
        token: SessionToken,
        /// Captured tab.
        tab: TabId,
    },
    /// The image was delivered.
    Completed {
        /// Session token.
        token: SessionToken,
        /// Output filename.
        filename: String,
        /// Output width in pixels.
        width: u32,
        /// Output height in pixels.
        height: u32,
    },
    /// The session failed; no image was produced.
    Failed {
        /// Session token.
        token: SessionToken,
        /// Error description.
        error: String,
    },
    /// The page may not be fully restored.
    RestoreWarning {
        /// Session token.
        token: SessionToken,
        /// What went wrong.
        message: String,
    },
}

impl CaptureEvent {
    /// Returns the notification method for this event.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Started { .. } => "capture.started",
            Self::Completed { .. } => "capture.completed",
            Self::Failed { .. } => "capture.failed",
            Self::RestoreWarning { .. } => "capture.warning",
        }
    }

    /// Returns the notification params for this event.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            Self::Started { token, tab } => json!({ "token": token, "tabId": tab }),
            Self::Completed {
                token,
                filename,
                width,
                height,
            } => json!({
                "token": token,
                "filename": filename,
                "width": width,
                "height": height,
            }),
            Self::Failed { token, error } => json!({ "token": token, "error": error }),
            Self::RestoreWarning { token, message } => {
                json!({ "token": token, "message": message })
            }
        }
    }
}

/// Result of a successful session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    /// Session token.
    pub token: SessionToken,
    /// Captured tab.
    pub tab: TabId,
    /// Measurements taken after stabilization.
    pub metrics: PageMetrics,
    /// Number of frames captured.
    pub frames: usize,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Delivered payload.
    pub payload: ImagePayload,
    /// Set when the page restore reported a problem.
    pub restore_warning: Option<String>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs capture sessions against a [`CaptureHost`].
pub struct Orchestrator<H: ?Sized> {
    host: Arc<H>,
    options: CaptureOptions,
    lock: SessionLock,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
}

impl<H: CaptureHost + ?Sized + 'static> Orchestrator<H> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(host: Arc<H>, options: CaptureOptions) -> Self {
        Self {
            host,
            options,
            lock: SessionLock::new(),
            events: None,
        }
    }

    /// Attaches an event channel.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the capture options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Returns the session lock.
    #[inline]
    #[must_use]
    pub fn session_lock(&self) -> &SessionLock {
        &self.lock
    }

    /// Acquires the session lock without running anything yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is running.
    pub fn try_begin(&self) -> Result<ActiveSession> {
        self.lock.try_acquire()
    }

    /// Acquires the lock and runs one session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is running, or the error
    /// that ended the session.
    pub async fn run(&self) -> Result<CaptureOutcome> {
        let session = self.try_begin()?;
        self.run_session(session).await
    }

    /// Runs one session under an already acquired lock.
    ///
    /// The lock is released when this returns. If the returned future is
    /// dropped while the page is stabilized, the page is restored in a
    /// spawned task and the lock is released after that.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session. Restore problems are not
    /// errors; they appear in [`CaptureOutcome::restore_warning`] and as
    /// [`CaptureEvent::RestoreWarning`].
    pub async fn run_session(&self, session: ActiveSession) -> Result<CaptureOutcome> {
        let token = session.token();
        let mut guard = RestoreGuard::new(Arc::clone(&self.host), session);

        match self.capture(token, &mut guard).await {
            Ok(outcome) => {
                info!(
                    %token,
                    width = outcome.width,
                    height = outcome.height,
                    frames = outcome.frames,
                    "Capture completed"
                );
                self.emit(CaptureEvent::Completed {
                    token,
                    filename: outcome.payload.filename.clone(),
                    width: outcome.width,
                    height: outcome.height,
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(%token, error = %e, "Capture failed");
                self.emit(CaptureEvent::Failed {
                    token,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Session body: everything between lock and outcome reporting.
    async fn capture(
        &self,
        token: SessionToken,
        guard: &mut RestoreGuard<H>,
    ) -> Result<CaptureOutcome> {
        let tab = self.host.active_tab().await?.ok_or(Error::NoTarget)?;

        info!(tab_id = %tab, %token, "Capture started");
        self.emit(CaptureEvent::Started { token, tab });

        let stabilizer = Stabilizer::new(&*self.host);

        guard.arm(tab);
        let captured = self.capture_frames(&stabilizer, tab, token).await;
        let restore_warning = self.restore_page(&stabilizer, tab, token).await;
        guard.disarm();
        let (metrics, frames) = captured?;

        let canvas = compositor::stitch(&frames, metrics.content_height, metrics.viewport_height)?;
        let payload = emitter::encode(&canvas, &self.options)?;
        emitter::deliver(&*self.host, &payload).await?;

        Ok(CaptureOutcome {
            token,
            tab,
            metrics,
            frames: frames.len(),
            width: canvas.width(),
            height: canvas.height(),
            payload,
            restore_warning,
        })
    }

    /// Stabilizes the page and captures every step.
    async fn capture_frames(
        &self,
        stabilizer: &Stabilizer<'_, H>,
        tab: TabId,
        token: SessionToken,
    ) -> Result<(PageMetrics, Vec<Frame>)> {
        let page = stabilizer.prepare(tab, token).await?;
        let metrics = page.metrics();
        let plan = ScrollPlan::new(metrics.content_height, metrics.viewport_height)?;
        let capturer = FrameCapturer::new(&*self.host, self.options.retry);

        debug!(tab_id = %tab, steps = plan.steps(), "Scroll plan ready");

        let mut frames = Vec::with_capacity(plan.steps());
        for (step, offset) in plan.offsets().enumerate() {
            let bytes = async {
                stabilizer.scroll_to(&page, offset).await?;
                sleep(self.options.settle_delay).await;
                capturer.capture_visible(tab).await
            }
            .await
            .map_err(|e| match e {
                Error::RateLimitExceeded { .. } => e,
                other => Error::capture_step(step, other),
            })?;

            debug!(tab_id = %tab, step, offset, "Step captured");
            frames.push(Frame::new(step, bytes));
        }

        Ok((metrics, frames))
    }

    /// Restores the page, turning any problem into a warning.
    async fn restore_page(
        &self,
        stabilizer: &Stabilizer<'_, H>,
        tab: TabId,
        token: SessionToken,
    ) -> Option<String> {
        let message = match stabilizer.restore(tab, token).await {
            Ok(report) if report.is_clean() => return None,
            Ok(report) => format!("Undo steps failed: {}", report.failures.join("; ")),
            Err(e) => e.to_string(),
        };

        warn!(tab_id = %tab, %token, %message, "Page restore incomplete");
        self.emit(CaptureEvent::RestoreWarning {
            token,
            message: message.clone(),
        });
        Some(message)
    }

    /// Sends an event if a channel is attached.
    fn emit(&self, event: CaptureEvent) {
        if let Some(events) = &self.events
            && events.send(event).is_err()
        {
            debug!("Event receiver dropped");
        }
    }
}

impl<H: ?Sized> fmt::Debug for Orchestrator<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
