//! Stabilization scripts against a real browser tab.
//!
//! Needs the scrollshot extension connecting to `SCROLLSHOT_PORT` (default
//! 9223) with a content page focused. Run with:
//!
//! ```sh
//! cargo test --test live_page -- --ignored --nocapture
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};

use scrollshot::service::DEFAULT_PORT;
use scrollshot::transport::PendingServer;
use scrollshot::{
    CaptureHost, CaptureOptions, ExtensionHost, Orchestrator, PageScript, SessionToken, Stabilizer,
    TabId,
};

/// Every element's tag and inline style in document order, plus the scroll
/// position.
const SNAPSHOT_SCRIPT: &str = r#"
return {
    nodes: Array.from(document.querySelectorAll('*'), (el) => [el.tagName, el.getAttribute('style')]),
    scrollX: window.scrollX,
    scrollY: window.scrollY,
};
"#;

/// Counts anything stabilization leaves behind.
const LEFTOVERS_SCRIPT: &str = r#"
return document.querySelectorAll('[data-scrollshot], #scrollshot-hide-scrollbars').length
    + (window[Symbol.for('scrollshot.stabilization')] ? 1 : 0);
"#;

/// Bottom edge of the lowest in-flow body child, in document coordinates.
const CONTENT_BOTTOM_SCRIPT: &str = r#"
let bottom = 0;
for (const el of document.body.children) {
    const position = getComputedStyle(el).position;
    if (position === 'fixed' || position === 'absolute') continue;
    bottom = Math.max(bottom, el.getBoundingClientRect().bottom + window.scrollY);
}
return Math.floor(bottom);
"#;

async fn connect() -> anyhow::Result<(Arc<ExtensionHost>, TabId)> {
    let port = std::env::var("SCROLLSHOT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        .await?
        .with_connect_timeout(Duration::from_secs(120));
    let (connection, _ready) = server.accept().await?;

    let host = Arc::new(ExtensionHost::new(connection));
    let tab = host.active_tab().await?.context("no focused tab")?;
    Ok((host, tab))
}

async fn run(
    host: &ExtensionHost,
    tab: TabId,
    name: &'static str,
    source: &'static str,
) -> anyhow::Result<Value> {
    Ok(host.execute_script(tab, &PageScript::new(name, source, Vec::new())).await?)
}

#[tokio::test]
#[ignore = "needs a browser with the extension connected"]
async fn test_live_page_is_restored_exactly() -> anyhow::Result<()> {
    let (host, tab) = connect().await?;
    let before = run(&host, tab, "test.snapshot", SNAPSHOT_SCRIPT).await?;
    let content_bottom = run(&host, tab, "test.contentBottom", CONTENT_BOTTOM_SCRIPT).await?;

    let stabilizer = Stabilizer::new(&*host);
    let token = SessionToken::generate();
    let page = stabilizer.prepare(tab, token).await?;
    let metrics = page.metrics();

    assert_eq!(stabilizer.prepare(tab, token).await?.metrics(), metrics);
    let content_bottom = content_bottom.as_u64().context("content bottom")?;
    assert!(
        u64::from(metrics.content_height) >= content_bottom,
        "measured {} px, content ends at {content_bottom} px",
        metrics.content_height
    );

    stabilizer.scroll_to(&page, metrics.viewport_height).await?;
    let report = stabilizer.restore(tab, token).await?;
    assert!(report.restored);
    assert!(report.is_clean(), "{:?}", report.failures);

    assert_eq!(run(&host, tab, "test.snapshot", SNAPSHOT_SCRIPT).await?, before);
    assert_eq!(run(&host, tab, "test.leftovers", LEFTOVERS_SCRIPT).await?, json!(0));
    Ok(())
}

#[tokio::test]
#[ignore = "needs a browser with the extension connected"]
async fn test_live_capture_covers_document() -> anyhow::Result<()> {
    let (host, tab) = connect().await?;
    let before = run(&host, tab, "test.snapshot", SNAPSHOT_SCRIPT).await?;

    let options = CaptureOptions::new().with_save_as(false);
    let outcome = Orchestrator::new(Arc::clone(&host), options).run().await?;

    let scale = outcome.metrics.device_pixel_ratio;
    let expected = (f64::from(outcome.metrics.content_height) * scale).round() as u32;
    assert!(outcome.height.abs_diff(expected) <= scale.ceil() as u32);
    assert!(outcome.restore_warning.is_none());
    assert_eq!(run(&host, tab, "test.snapshot", SNAPSHOT_SCRIPT).await?, before);
    Ok(())
}
