//! Command definitions organized by module.
//!
//! Commands follow `module.methodName` format.
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | `tabs` | Active tab lookup, visible viewport capture |
//! | `script` | In-page script execution (isolated world) |
//! | `downloads` | Saving a payload to disk |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All protocol commands organized by module.
///
/// This enum wraps module-specific command enums for unified serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Tabs module commands.
    Tabs(TabsCommand),
    /// Script module commands.
    Script(ScriptCommand),
    /// Downloads module commands.
    Downloads(DownloadsCommand),
}

// ============================================================================
// Tabs Commands
// ============================================================================

/// Tabs module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum TabsCommand {
    /// Find the active tab of the focused window.
    ///
    /// Result: `{ "tabId": number | null }`.
    #[serde(rename = "tabs.queryActive")]
    QueryActive,

    /// Capture the visible viewport of the target tab's window.
    ///
    /// Result: `{ "dataUrl": "data:image/png;base64,..." }`.
    #[serde(rename = "tabs.captureVisible")]
    CaptureVisible {
        /// Image format (`png`).
        format: String,
    },
}

// ============================================================================
// Script Commands
// ============================================================================

/// Script module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ScriptCommand {
    /// Execute a function body in the page's isolated world.
    ///
    /// `args` are exposed to the script as `arguments`.
    /// Result: `{ "value": any }`.
    #[serde(rename = "script.execute")]
    Execute {
        /// JavaScript function body.
        script: String,
        /// Script arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
}

// ============================================================================
// Downloads Commands
// ============================================================================

/// Downloads module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum DownloadsCommand {
    /// Save a URL (typically a data URL) to disk.
    #[serde(rename = "downloads.download")]
    Download {
        /// Source URL.
        url: String,
        /// Suggested filename.
        filename: String,
        /// Show the "save as" prompt.
        #[serde(rename = "saveAs")]
        save_as: bool,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_capture_visible_serialization() {
        let command = Command::Tabs(TabsCommand::CaptureVisible {
            format: "png".to_string(),
        });
        let value = serde_json::to_value(&command).expect("serialize");

        assert_eq!(value["method"], "tabs.captureVisible");
        assert_eq!(value["params"]["format"], "png");
    }

    #[test]
    fn test_query_active_has_no_params() {
        let value = serde_json::to_value(Command::Tabs(TabsCommand::QueryActive)).expect("serialize");
        assert_eq!(value["method"], "tabs.queryActive");
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_script_execute_serialization() {
        let command = Command::Script(ScriptCommand::Execute {
            script: "return arguments[0] + 1;".to_string(),
            args: vec![json!(41)],
        });
        let value = serde_json::to_value(&command).expect("serialize");

        assert_eq!(value["method"], "script.execute");
        assert_eq!(value["params"]["args"], json!([41]));
    }

    #[test]
    fn test_download_uses_camel_case_save_as() {
        let command = Command::Downloads(DownloadsCommand::Download {
            url: "data:image/png;base64,AAAA".to_string(),
            filename: "screenshot.png".to_string(),
            save_as: true,
        });
        let value = serde_json::to_value(&command).expect("serialize");

        assert_eq!(value["method"], "downloads.download");
        assert_eq!(value["params"]["saveAs"], true);
        assert_eq!(value["params"]["filename"], "screenshot.png");
    }
}
