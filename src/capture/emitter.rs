//! Encoding the stitched image and handing it to the download sink.

// ============================================================================
// Imports
// ============================================================================

use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use image::{ImageFormat, RgbaImage};
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::host::CaptureHost;

use super::options::CaptureOptions;

// ============================================================================
// Constants
// ============================================================================

/// MIME type of the output image.
pub const PNG_MIME: &str = "image/png";

/// `data:<mime>;base64,<payload>`
static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime>[\w.+-]+/[\w.+-]+);base64,(?P<data>[A-Za-z0-9+/=\s]*)$")
        .expect("data URL pattern is valid")
});

// ============================================================================
// ImagePayload
// ============================================================================

/// An encoded image ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime: &'static str,
    /// Suggested filename.
    pub filename: String,
    /// Ask the user where to save.
    pub save_as: bool,
}

impl ImagePayload {
    /// Returns the payload as a `data:` URL.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, Base64Standard.encode(&self.bytes))
    }

    /// Writes the encoded bytes to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), &self.bytes)?;
        Ok(())
    }
}

// ============================================================================
// Public Functions
// ============================================================================

/// Encodes `canvas` as a lossless PNG payload.
///
/// # Errors
///
/// Returns [`Error::Image`] if encoding fails.
pub fn encode(canvas: &RgbaImage, options: &CaptureOptions) -> Result<ImagePayload> {
    let mut output = Cursor::new(Vec::new());
    canvas.write_to(&mut output, ImageFormat::Png)?;

    let bytes = output.into_inner();
    debug!(
        width = canvas.width(),
        height = canvas.height(),
        bytes = bytes.len(),
        "Encoded PNG"
    );

    Ok(ImagePayload {
        bytes,
        mime: PNG_MIME,
        filename: options.filename.clone(),
        save_as: options.save_as,
    })
}

/// Hands `payload` to the host's download sink.
///
/// # Errors
///
/// Propagates the host's download error.
pub async fn deliver<H: CaptureHost + ?Sized>(host: &H, payload: &ImagePayload) -> Result<()> {
    host.download(payload).await?;
    info!(filename = %payload.filename, bytes = payload.bytes.len(), "Image delivered");
    Ok(())
}

/// Decodes a base64 `data:` URL into raw bytes.
///
/// # Errors
///
/// - [`Error::Protocol`] if `url` is not a base64 data URL
/// - [`Error::Base64`] if the payload is not valid base64
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let captures = DATA_URL.captures(url).ok_or_else(|| {
        let prefix: String = url.chars().take(32).collect();
        Error::protocol(format!("Not a base64 data URL: {prefix}"))
    })?;

    let data: String = captures["data"]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    Ok(Base64Standard.decode(data)?)
}

// ============================================================================
// Tests
// ============================================================================
