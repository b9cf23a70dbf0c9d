//! Stitching benchmark suite.
//!
//! Benchmarks frame composition at different page lengths:
//! - Viewport: 1280x800 at 1x and 2x
//! - Page heights: 1, 5 and 20 viewports
//!
//! Run with: cargo bench --bench stitch
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use image::{ImageFormat, Rgba, RgbaImage};

use scrollshot::capture::{CaptureOptions, Frame, ScrollPlan, encode, plan_draws, stitch};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 800;
const PAGE_VIEWPORTS: &[u32] = &[1, 5, 20];
const SCALES: &[u32] = &[1, 2];

// ============================================================================
// Fixtures
// ============================================================================

/// Renders the frames a page of `content_height` would produce at `scale`.
fn frames_for(content_height: u32, scale: u32) -> Vec<Frame> {
    let plan = ScrollPlan::new(content_height, VIEWPORT_HEIGHT).expect("valid plan");

    plan.offsets()
        .enumerate()
        .map(|(index, offset)| {
            let img = RgbaImage::from_fn(
                VIEWPORT_WIDTH * scale,
                VIEWPORT_HEIGHT * scale,
                |x, y| {
                    let row = offset * scale + y;
                    Rgba([(row & 0xff) as u8, (x & 0xff) as u8, (row >> 8) as u8, 255])
                },
            );
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png).expect("encode frame");
            Frame::new(index, out.into_inner())
        })
        .collect()
}

// ============================================================================
// Benchmark: Draw Planning
// ============================================================================

fn bench_plan_draws(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_draws");

    for &viewports in PAGE_VIEWPORTS {
        let heights = vec![VIEWPORT_HEIGHT; viewports as usize + 1];
        let canvas = VIEWPORT_HEIGHT * viewports + VIEWPORT_HEIGHT / 2;

        group.bench_with_input(BenchmarkId::from_parameter(viewports), &heights, |b, h| {
            b.iter(|| plan_draws(black_box(h), black_box(canvas)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Stitch
// ============================================================================

fn bench_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch");
    group.sample_size(10);

    for &scale in SCALES {
        for &viewports in PAGE_VIEWPORTS {
            let content_height = VIEWPORT_HEIGHT * viewports;
            let frames = frames_for(content_height, scale);

            group.bench_with_input(
                BenchmarkId::new(format!("{scale}x"), viewports),
                &frames,
                |b, frames| {
                    b.iter(|| {
                        stitch(black_box(frames), content_height, VIEWPORT_HEIGHT)
                            .expect("stitch")
                    });
                },
            );
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Encode
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.sample_size(10);

    let options = CaptureOptions::default();
    for &viewports in PAGE_VIEWPORTS {
        let content_height = VIEWPORT_HEIGHT * viewports;
        let canvas = stitch(&frames_for(content_height, 1), content_height, VIEWPORT_HEIGHT)
            .expect("stitch");

        group.bench_with_input(BenchmarkId::from_parameter(viewports), &canvas, |b, canvas| {
            b.iter(|| encode(black_box(canvas), &options).expect("encode"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan_draws, bench_stitch, bench_encode);
criterion_main!(benches);
