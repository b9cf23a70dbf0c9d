//! Page stabilization and virtual scrolling.
//!
//! Before capturing, the page is frozen so that no content repeats across
//! frame boundaries:
//!
//! - `position: fixed` elements are hidden
//! - `position: sticky` elements are forced static
//! - scrollbars are hidden by an injected stylesheet
//! - `<html>` clips at the viewport; `<body>` keeps `overflow: visible` so
//!   its own box never clips the translated content
//! - all body children move into one wrapper that is scrolled with a
//!   `transform`, so no native scroll events fire
//!
//! Content height is measured in document coordinates: the wrapper's top
//! (body margin and padding) plus its height.
//!
//! Every mutation pushes its own inverse onto an undo log kept in the page.
//! [`Stabilizer::restore`] replays that log in reverse. The log lives under a
//! `Symbol.for` slot tagged with the session token: a second prepare with the
//! same token is a no-op, a prepare with another token is rejected.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::{CaptureHost, PageScript};
use crate::identifiers::{SessionToken, TabId};

// ============================================================================
// Types
// ============================================================================

/// Page measurements taken after stabilization.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    /// Document height from the top of the page to the bottom of the
    /// wrapped content, in CSS pixels.
    pub content_height: u32,
    /// Viewport height, in CSS pixels.
    pub viewport_height: u32,
    /// Device pixel ratio of the page.
    pub device_pixel_ratio: f64,
}

/// Handle to a stabilized page.
///
/// Returned by [`Stabilizer::prepare`] and threaded through scrolling and
/// restore.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizedPage {
    tab: TabId,
    token: SessionToken,
    metrics: PageMetrics,
}

impl StabilizedPage {
    /// Returns the stabilized tab.
    #[inline]
    #[must_use]
    pub fn tab(&self) -> TabId {
        self.tab
    }

    /// Returns the owning session token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Returns the measurements taken at prepare time.
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> PageMetrics {
        self.metrics
    }
}

/// Outcome of replaying the undo log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RestoreReport {
    /// `false` when no stabilization for this session was found.
    pub restored: bool,
    /// Undo entries that threw, in replay order.
    #[serde(default)]
    pub failures: Vec<String>,
}

impl RestoreReport {
    /// Returns `true` if every undo entry ran cleanly.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Stabilizer
// ============================================================================

/// Drives the in-page stabilization scripts through a [`CaptureHost`].
pub struct Stabilizer<'h, H: ?Sized> {
    host: &'h H,
}

impl<'h, H: CaptureHost + ?Sized> Stabilizer<'h, H> {
    /// Creates a stabilizer for `host`.
    #[inline]
    #[must_use]
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }

    /// Freezes the page layout and measures it.
    ///
    /// Calling this again with the same token returns the original
    /// measurements without touching the page.
    ///
    /// # Errors
    ///
    /// - [`Error::ScriptError`] if the page is held by another session
    /// - [`Error::Json`] if the script returns malformed metrics
    pub async fn prepare(&self, tab: TabId, token: SessionToken) -> Result<StabilizedPage> {
        let script = PageScript::new(
            "stabilizer.prepare",
            PREPARE_SCRIPT,
            vec![json!(token.to_string())],
        );

        let value = self.host.execute_script(tab, &script).await?;
        let metrics: PageMetrics = serde_json::from_value(value)?;

        debug!(
            tab_id = %tab,
            %token,
            content_height = metrics.content_height,
            viewport_height = metrics.viewport_height,
            dpr = metrics.device_pixel_ratio,
            "Page stabilized"
        );

        Ok(StabilizedPage {
            tab,
            token,
            metrics,
        })
    }

    /// Moves the virtual scroll position to `offset` CSS pixels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScriptError`] if the page is not stabilized for this
    /// session.
    pub async fn scroll_to(&self, page: &StabilizedPage, offset: u32) -> Result<()> {
        debug!(tab_id = %page.tab, offset, "Virtual scroll");

        let script = PageScript::new(
            "stabilizer.scrollTo",
            SCROLL_TO_SCRIPT,
            vec![json!(page.token.to_string()), json!(offset)],
        );

        self.host.execute_script(page.tab, &script).await?;
        Ok(())
    }

    /// Reverses stabilization for the session.
    ///
    /// Safe to call when prepare never ran or failed halfway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Restore`] if the script could not run at all.
    /// Individual undo entries that fail are listed in the report instead.
    pub async fn restore(&self, tab: TabId, token: SessionToken) -> Result<RestoreReport> {
        let script = PageScript::new(
            "stabilizer.restore",
            RESTORE_SCRIPT,
            vec![json!(token.to_string())],
        );

        let value = self
            .host
            .execute_script(tab, &script)
            .await
            .map_err(|e| Error::restore(e.to_string()))?;

        let report = parse_report(value)?;

        debug!(
            tab_id = %tab,
            %token,
            restored = report.restored,
            failures = report.failures.len(),
            "Undo log replayed"
        );

        Ok(report)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parses the restore script's return value.
fn parse_report(value: Value) -> Result<RestoreReport> {
    serde_json::from_value(value)
        .map_err(|e| Error::restore(format!("Malformed restore report: {e}")))
}

// ============================================================================
// Scripts
// ============================================================================

/// Freezes layout and records the undo log.
///
/// `arguments[0]`: session token.
/// Returns `{ contentHeight, viewportHeight, devicePixelRatio }`.
pub(crate) const PREPARE_SCRIPT: &str = r#"
const token = arguments[0];
const slot = Symbol.for('scrollshot.stabilization');
const existing = window[slot];
if (existing) {
    if (existing.token !== token) {
        throw new Error('page is already stabilized by session ' + existing.token);
    }
    if (!existing.metrics) {
        throw new Error('previous stabilization did not complete');
    }
    return existing.metrics;
}

const undo = [];
const record = { token: token, undo: undo, wrapper: null, metrics: null };
window[slot] = record;

const saveStyle = (el) => {
    const attr = el.getAttribute('style');
    undo.push(() => {
        if (attr === null) el.removeAttribute('style');
        else el.setAttribute('style', attr);
    });
};

const scrollX = window.scrollX;
const scrollY = window.scrollY;
undo.push(() => window.scrollTo(scrollX, scrollY));

for (const el of document.querySelectorAll('body *')) {
    const position = getComputedStyle(el).position;
    if (position === 'fixed') {
        saveStyle(el);
        el.style.setProperty('visibility', 'hidden', 'important');
        el.style.setProperty('pointer-events', 'none', 'important');
    } else if (position === 'sticky') {
        saveStyle(el);
        el.style.setProperty('position', 'static', 'important');
        el.style.setProperty('top', 'auto', 'important');
        el.style.setProperty('z-index', 'auto', 'important');
    }
}

const sheetId = 'scrollshot-hide-scrollbars';
if (!document.getElementById(sheetId)) {
    const sheet = document.createElement('style');
    sheet.id = sheetId;
    sheet.textContent =
        '::-webkit-scrollbar { width: 0 !important; height: 0 !important; display: none !important; }' +
        'html, body, * { scrollbar-width: none !important; -ms-overflow-style: none !important; }';
    (document.head || document.documentElement).appendChild(sheet);
    undo.push(() => sheet.remove());
}

saveStyle(document.documentElement);
document.documentElement.style.setProperty('overflow', 'hidden', 'important');
saveStyle(document.body);
document.body.style.setProperty('overflow', 'visible', 'important');
window.scrollTo(0, 0);

// flow-root keeps child margins from collapsing through the wrapper.
const wrapper = document.createElement('div');
wrapper.setAttribute('data-scrollshot', token);
wrapper.style.cssText =
    'display: flow-root; position: relative; left: 0; top: 0; width: 100%;' +
    'margin: 0; padding: 0; transform: translate3d(0, 0, 0); will-change: transform;';
while (document.body.firstChild) {
    wrapper.appendChild(document.body.firstChild);
}
document.body.appendChild(wrapper);
undo.push(() => {
    while (wrapper.firstChild) {
        document.body.insertBefore(wrapper.firstChild, wrapper);
    }
    wrapper.remove();
});
record.wrapper = wrapper;

const rect = wrapper.getBoundingClientRect();
record.metrics = {
    contentHeight: Math.ceil(rect.top + window.scrollY + rect.height),
    viewportHeight: window.innerHeight,
    devicePixelRatio: window.devicePixelRatio || 1,
};
return record.metrics;
"#;

/// Translates the wrapper; never scrolls natively.
///
/// `arguments[0]`: session token, `arguments[1]`: offset in CSS pixels.
pub(crate) const SCROLL_TO_SCRIPT: &str = r#"
const record = window[Symbol.for('scrollshot.stabilization')];
if (!record || record.token !== arguments[0] || !record.wrapper) {
    throw new Error('page is not stabilized for session ' + arguments[0]);
}
const offset = Math.max(0, Number(arguments[1]) || 0);
record.wrapper.style.transform = 'translate3d(0, ' + (-offset) + 'px, 0)';
return { offset: offset };
"#;

/// Replays the undo log in reverse and clears the slot.
///
/// `arguments[0]`: session token.
/// Returns `{ restored, failures }`.
pub(crate) const RESTORE_SCRIPT: &str = r#"
const slot = Symbol.for('scrollshot.stabilization');
const record = window[slot];
if (!record) {
    return { restored: false, failures: [] };
}
if (record.token !== arguments[0]) {
    return { restored: false, failures: ['page is stabilized by session ' + record.token] };
}
const failures = [];
while (record.undo.length > 0) {
    const step = record.undo.pop();
    try {
        step();
    } catch (e) {
        failures.push(String((e && e.message) || e));
    }
}
delete window[slot];
return { restored: true, failures: failures };
"#;

// ============================================================================
// Tests
// ============================================================================
