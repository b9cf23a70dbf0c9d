//! One full-page capture of the focused tab.
//!
//! Demonstrates:
//! - Waiting for the extension to connect
//! - Running a single capture session with progress events
//! - Saving the stitched PNG locally as well as downloading it
//!
//! Usage:
//!   cargo run --example 001_capture_page
//!   cargo run --example 001_capture_page -- --port 9223 --out page.png
//!   cargo run --example 001_capture_page -- --no-wait --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::Args;
use scrollshot::transport::PendingServer;
use scrollshot::{CaptureEvent, CaptureOptions, ExtensionHost, Orchestrator, Result};

// ============================================================================
// Constants
// ============================================================================

const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 001: Capture Page ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), args.port)
        .await?
        .with_connect_timeout(CONNECT_TIMEOUT);
    println!("[Setup] Waiting for the extension on {}...", server.ws_url());

    let (connection, ready) = match server.accept().await {
        Ok(accepted) => accepted,
        Err(e) if e.is_timeout() => {
            println!("        ✗ No extension connected within {CONNECT_TIMEOUT:?}");
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    println!(
        "        ✓ Connected ({} {})\n",
        ready.extension, ready.version
    );

    // ========================================================================
    // Capture
    // ========================================================================

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let host = Arc::new(ExtensionHost::new(connection));
    let orchestrator = Orchestrator::new(host, CaptureOptions::new().with_save_as(false))
        .with_events(events_tx);

    println!("[1] Capturing the focused tab");
    let outcome = orchestrator.run().await;

    while let Ok(event) = events.try_recv() {
        match event {
            CaptureEvent::Started { tab, .. } => println!("    started on tab {tab}"),
            CaptureEvent::RestoreWarning { message, .. } => {
                println!("    ! page restore: {message}");
            }
            CaptureEvent::Completed { width, height, .. } => {
                println!("    completed: {width}x{height}");
            }
            CaptureEvent::Failed { error, .. } => println!("    failed: {error}"),
        }
    }

    let outcome = outcome?;
    println!(
        "    Page: {} css px in a {} css px viewport at {}x",
        outcome.metrics.content_height,
        outcome.metrics.viewport_height,
        outcome.metrics.device_pixel_ratio
    );
    println!("    Frames: {}", outcome.frames);
    println!("    ✓ Downloaded as {}\n", outcome.payload.filename);

    // ========================================================================
    // Save
    // ========================================================================

    println!("[2] Saving a local copy");
    outcome.payload.save(&args.out)?;
    println!("    ✓ Wrote {}\n", args.out.display());

    common::wait_for_exit(args.no_wait).await;
    Ok(())
}
