//! Stitching captured frames into one image.
//!
//! The canvas is as tall as the page content at capture resolution. Frames
//! are drawn top to bottom. The last scroll step is clamped to the page end,
//! so the last frame overlaps its predecessor; only its bottom rows that are
//! still missing are drawn.

// ============================================================================
// Imports
// ============================================================================

use image::{GenericImageView, RgbaImage, imageops};
use tracing::debug;

use crate::error::{Error, Result};

use super::capturer::Frame;

// ============================================================================
// Types
// ============================================================================

/// One copy from a frame into the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawOp {
    /// Index into the frame list.
    pub frame: usize,
    /// First source row.
    pub src_y: u32,
    /// First destination row.
    pub dst_y: u32,
    /// Rows copied.
    pub height: u32,
}

// ============================================================================
// Public Functions
// ============================================================================

/// Returns the canvas height for `content_height` at `scale`.
#[inline]
#[must_use]
pub fn canvas_height(content_height: u32, scale: f64) -> u32 {
    (f64::from(content_height) * scale).round() as u32
}

/// Plans the copies that fill a canvas of `canvas_height` rows.
///
/// `frame_heights` are the decoded heights in capture order. Frames after
/// the canvas is full produce no op. The last of several frames is read
/// from `frame_height - remaining` so the canvas ends exactly at the page
/// bottom.
#[must_use]
pub fn plan_draws(frame_heights: &[u32], canvas_height: u32) -> Vec<DrawOp> {
    let mut ops = Vec::with_capacity(frame_heights.len());
    let mut y = 0u32;
    let last = frame_heights.len().saturating_sub(1);

    for (index, &frame_height) in frame_heights.iter().enumerate() {
        let remaining = canvas_height.saturating_sub(y);
        if remaining == 0 {
            break;
        }

        let height = frame_height.min(remaining);
        if height == 0 {
            continue;
        }

        // The clamped last step overlaps its predecessor; keep its bottom
        // rows. A lone frame of a short page starts at offset 0 instead.
        let src_y = if index == last && index > 0 && frame_height > remaining {
            frame_height - remaining
        } else {
            0
        };

        ops.push(DrawOp {
            frame: index,
            src_y,
            dst_y: y,
            height,
        });
        y += height;
    }

    ops
}

/// Stitches `frames` into one image.
///
/// # Errors
///
/// - [`Error::Composition`] if `frames` is empty or the canvas would be empty
/// - [`Error::Image`] if a frame cannot be decoded
pub fn stitch(frames: &[Frame], content_height: u32, viewport_height: u32) -> Result<RgbaImage> {
    let first = frames
        .first()
        .ok_or_else(|| Error::composition("No frames to stitch"))?;

    if viewport_height == 0 {
        return Err(Error::composition("Viewport height is zero"));
    }

    let first = image::load_from_memory(&first.bytes)?.to_rgba8();
    let (width, first_height) = first.dimensions();
    let scale = f64::from(first_height) / f64::from(viewport_height);
    let height = canvas_height(content_height, scale);

    if width == 0 || height == 0 {
        return Err(Error::composition(format!(
            "Cannot allocate a {width}x{height} canvas"
        )));
    }

    debug!(
        frames = frames.len(),
        width,
        height,
        scale,
        "Stitching frames"
    );

    let mut decoded = Vec::with_capacity(frames.len());
    decoded.push(first);
    for frame in &frames[1..] {
        decoded.push(image::load_from_memory(&frame.bytes)?.to_rgba8());
    }

    let heights: Vec<u32> = decoded.iter().map(|img| img.height()).collect();
    let mut canvas = RgbaImage::new(width, height);

    for op in plan_draws(&heights, height) {
        let source = &decoded[op.frame];
        let copy_width = source.width().min(width);
        let tile = source.view(0, op.src_y, copy_width, op.height).to_image();
        imageops::replace(&mut canvas, &tile, 0, i64::from(op.dst_y));
    }

    Ok(canvas)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use image::{ImageFormat, Rgba};
    use proptest::prelude::*;

    /// Encodes a frame whose row `r` is filled with the value `base + r`.
    fn gradient_frame(index: usize, width: u32, height: u32, base: u32) -> Frame {
        let img = RgbaImage::from_fn(width, height, |_, y| {
            let v = base + y;
            Rgba([(v & 0xff) as u8, ((v >> 8) & 0xff) as u8, 0, 255])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode");
        Frame::new(index, out.into_inner())
    }

    fn row_value(img: &RgbaImage, y: u32) -> u32 {
        let px = img.get_pixel(0, y);
        u32::from(px[0]) | (u32::from(px[1]) << 8)
    }

    #[test]
    fn test_plan_trims_last_frame_from_bottom() {
        // H = 2500, V = 1000, scale 1: offsets 0, 1000, 1500.
        let ops = plan_draws(&[1000, 1000, 1000], 2500);

        assert_eq!(
            ops,
            vec![
                DrawOp { frame: 0, src_y: 0, dst_y: 0, height: 1000 },
                DrawOp { frame: 1, src_y: 0, dst_y: 1000, height: 1000 },
                DrawOp { frame: 2, src_y: 500, dst_y: 2000, height: 500 },
            ]
        );
        assert_eq!(ops.iter().map(|op| op.height).sum::<u32>(), 2500);
    }

    #[test]
    fn test_plan_single_frame_taller_than_canvas() {
        // Short page: the only step sits at offset 0, content is at the top.
        let ops = plan_draws(&[1000], 600);
        assert_eq!(ops, vec![DrawOp { frame: 0, src_y: 0, dst_y: 0, height: 600 }]);
    }

    #[test]
    fn test_plan_stops_when_canvas_full() {
        let ops = plan_draws(&[1000, 1000, 1000, 1000], 2000);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_stitch_matches_page_content() {
        // Each frame shows page rows [offset, offset + 1000).
        let frames = vec![
            gradient_frame(0, 4, 1000, 0),
            gradient_frame(1, 4, 1000, 1000),
            gradient_frame(2, 4, 1000, 1500),
        ];

        let canvas = stitch(&frames, 2500, 1000).expect("stitch");

        assert_eq!(canvas.dimensions(), (4, 2500));
        for y in [0, 999, 1000, 1999, 2000, 2250, 2499] {
            assert_eq!(row_value(&canvas, y), y, "row {y}");
        }
    }

    #[test]
    fn test_stitch_scales_by_device_pixel_ratio() {
        // Viewport 500 CSS px captured at 2x.
        let frames = vec![
            gradient_frame(0, 2, 1000, 0),
            gradient_frame(1, 2, 1000, 600),
        ];

        let canvas = stitch(&frames, 800, 500).expect("stitch");

        assert_eq!(canvas.height(), 1600);
        assert_eq!(row_value(&canvas, 1599), 1599);
        assert_eq!(row_value(&canvas, 1000), 1000);
    }

    #[test]
    fn test_stitch_single_short_page() {
        let frames = vec![gradient_frame(0, 3, 1000, 0)];
        let canvas = stitch(&frames, 400, 1000).expect("stitch");

        assert_eq!(canvas.height(), 400);
        assert_eq!(row_value(&canvas, 0), 0);
        assert_eq!(row_value(&canvas, 399), 399);
    }

    #[test]
    fn test_stitch_rejects_empty_frames() {
        let err = stitch(&[], 1000, 1000).expect_err("no frames");
        assert!(matches!(err, Error::Composition { .. }));
    }

    #[test]
    fn test_stitch_rejects_zero_content() {
        let frames = vec![gradient_frame(0, 2, 10, 0)];
        let err = stitch(&frames, 0, 10).expect_err("empty canvas");
        assert!(matches!(err, Error::Composition { .. }));
    }

    #[test]
    fn test_stitch_rejects_garbage_bytes() {
        let frames = vec![Frame::new(0, vec![0, 1, 2, 3])];
        let err = stitch(&frames, 10, 10).expect_err("not a png");
        assert!(matches!(err, Error::Image(_)));
    }

    proptest! {
        #[test]
        fn prop_drawn_height_equals_canvas(
            viewport in 1u32..2000,
            content in 1u32..20_000,
        ) {
            let steps = content.div_ceil(viewport).max(1) as usize;
            let heights = vec![viewport; steps];
            let ops = plan_draws(&heights, content);

            let drawn: u32 = ops.iter().map(|op| op.height).sum();
            prop_assert_eq!(drawn, content);

            // Contiguous, no overlap.
            let mut y = 0;
            for op in &ops {
                prop_assert_eq!(op.dst_y, y);
                y += op.height;
            }
        }
    }
}
