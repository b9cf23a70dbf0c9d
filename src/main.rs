//! `scrollshot` - serve full-page captures to the browser extension.

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use scrollshot::capture::options::{
    DEFAULT_BACKOFF_BASE, DEFAULT_FILENAME, DEFAULT_MAX_RETRIES, DEFAULT_SETTLE_DELAY,
};
use scrollshot::service::DEFAULT_PORT;
use scrollshot::{CaptureOptions, CaptureService, Result, RetryPolicy, ServiceConfig};

/// How long Ctrl+C waits for a running session to restore its page.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// Args
// ============================================================================

/// Full-page screenshot service for the scrollshot browser extension.
#[derive(Debug, Parser)]
#[command(name = "scrollshot", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "SCROLLSHOT_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port the extension connects to.
    #[arg(long, env = "SCROLLSHOT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Milliseconds to wait after each scroll before capturing.
    #[arg(long, env = "SCROLLSHOT_SETTLE_MS", default_value_t = DEFAULT_SETTLE_DELAY.as_millis() as u64)]
    settle_ms: u64,

    /// Milliseconds before the first rate-limit retry; doubles each retry.
    #[arg(long, env = "SCROLLSHOT_BACKOFF_MS", default_value_t = DEFAULT_BACKOFF_BASE.as_millis() as u64)]
    backoff_ms: u64,

    /// Rate-limit retries per frame.
    #[arg(long, env = "SCROLLSHOT_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Suggested filename for the download.
    #[arg(long, env = "SCROLLSHOT_FILENAME", default_value = DEFAULT_FILENAME)]
    filename: String,

    /// Save without asking the user for a location.
    #[arg(long)]
    no_prompt: bool,

    /// Exit after the first extension disconnects.
    #[arg(long)]
    once: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Builds the service configuration.
    fn config(&self) -> ServiceConfig {
        let capture = CaptureOptions::new()
            .with_settle_delay(Duration::from_millis(self.settle_ms))
            .with_retry(RetryPolicy::new(
                Duration::from_millis(self.backoff_ms),
                self.max_retries,
            ))
            .with_filename(self.filename.clone())
            .with_save_as(!self.no_prompt);

        ServiceConfig::new()
            .with_ip(self.host)
            .with_port(self.port)
            .with_capture(capture)
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "scrollshot stopped");
            ExitCode::FAILURE
        }
    }
}

/// Initializes tracing; `RUST_LOG` overrides the default filter.
fn init_logging(debug: bool) {
    let default = if debug {
        "scrollshot=debug"
    } else {
        "scrollshot=info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Accepts extension connections until Ctrl+C.
async fn run(args: Args) -> Result<()> {
    let config = args.config();

    loop {
        let service = CaptureService::bind(config.clone()).await?;
        info!(url = %service.ws_url(), "Waiting for extension");

        let connected = tokio::select! {
            accepted = service.accept() => match accepted {
                Ok(connected) => connected,
                Err(e) if e.is_timeout() => {
                    debug!("No extension yet, still waiting");
                    continue;
                }
                Err(e) => return Err(e),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };

        tokio::select! {
            () = connected.serve() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                if !connected.stop(SHUTDOWN_GRACE).await {
                    warn!("Exiting before the page was restored");
                }
                return Ok(());
            }
        }

        if args.once {
            return Ok(());
        }
    }
}
