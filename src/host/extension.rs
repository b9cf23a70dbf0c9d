//! [`CaptureHost`] backed by the companion browser extension.
//!
//! Each trait call becomes one protocol request on the shared
//! [`Connection`]; the extension performs the browser API call and replies.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::capture::ImagePayload;
use crate::capture::emitter::decode_data_url;
use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::{Command, DownloadsCommand, Request, ScriptCommand, TabsCommand};
use crate::transport::Connection;

use super::{CaptureHost, PageScript};

// ============================================================================
// ExtensionHost
// ============================================================================

/// Capture host that drives the browser through the extension.
#[derive(Clone)]
pub struct ExtensionHost {
    connection: Connection,
}

impl ExtensionHost {
    /// Creates a host over an established connection.
    #[inline]
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sends a request and unwraps the result value.
    async fn call(&self, request: Request) -> Result<Value> {
        let tab_id = request.tab_id;
        self.connection.send(request).await?.into_result(tab_id)
    }
}

impl std::fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHost")
            .field("pending", &self.connection.pending_count())
            .field("closed", &self.connection.is_closed())
            .finish()
    }
}

#[async_trait]
impl CaptureHost for ExtensionHost {
    async fn active_tab(&self) -> Result<Option<TabId>> {
        let result = self
            .call(Request::global(Command::Tabs(TabsCommand::QueryActive)))
            .await?;

        let tab_id = result
            .get("tabId")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .and_then(TabId::new);

        debug!(?tab_id, "Active tab resolved");
        Ok(tab_id)
    }

    async fn execute_script(&self, tab: TabId, script: &PageScript) -> Result<Value> {
        debug!(tab_id = %tab, script = script.name, "Executing page script");

        let command = Command::Script(ScriptCommand::Execute {
            script: script.source.to_string(),
            args: script.args.clone(),
        });

        let result = self.call(Request::new(tab, command)).await?;

        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn capture_visible(&self, tab: TabId) -> Result<Vec<u8>> {
        let command = Command::Tabs(TabsCommand::CaptureVisible {
            format: "png".to_string(),
        });

        let result = self.call(Request::new(tab, command)).await?;

        let data_url = result
            .get("dataUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::protocol(format!(
                    "Capture response missing dataUrl field. Got: {result}"
                ))
            })?;

        decode_data_url(data_url)
    }

    async fn download(&self, payload: &ImagePayload) -> Result<()> {
        debug!(
            filename = %payload.filename,
            bytes = payload.bytes.len(),
            save_as = payload.save_as,
            "Handing image to download sink"
        );

        let command = Command::Downloads(DownloadsCommand::Download {
            url: payload.to_data_url(),
            filename: payload.filename.clone(),
            save_as: payload.save_as,
        });

        self.call(Request::global(command)).await?;
        Ok(())
    }
}
