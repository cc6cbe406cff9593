//! End-to-end exercise of the public `BurstOrchestrator` API, the shape an
//! external capture collaborator would actually drive (spec §6, §8).

use burst_sr::color::YuvFrame;
use burst_sr::pipeline::{BurstOrchestrator, BurstStage, PipelineConfig};

fn checkerboard(size: usize, period: usize) -> Vec<u8> {
    let mut plane = vec![0u8; size * size];
    for y in 0..size {
        for x in 0..size {
            plane[y * size + x] = if ((x / period) + (y / period)) % 2 == 0 { 210 } else { 60 };
        }
    }
    plane
}

fn shifted(base: &[u8], size: usize, dx: i64, dy: i64) -> Vec<u8> {
    let mut out = vec![0u8; size * size];
    for y in 0..size {
        for x in 0..size {
            let sx = x as i64 - dx;
            let sy = y as i64 - dy;
            out[y * size + x] = if sx >= 0 && sy >= 0 && (sx as usize) < size && (sy as usize) < size {
                base[sy as usize * size + sx as usize]
            } else {
                60
            };
        }
    }
    out
}

fn make_frame<'a>(y_plane: &'a [u8], uv: &'a [u8], size: usize) -> YuvFrame<'a> {
    YuvFrame {
        y_plane,
        u_plane: uv,
        v_plane: uv,
        y_row_stride: size,
        uv_row_stride: size / 2,
        uv_pixel_stride: 1,
        width: size,
        height: size,
    }
}

#[test]
fn burst_of_small_translations_upscales_without_fallback() {
    let size = 96usize;
    let reference = checkerboard(size, 6);
    let frame_a = shifted(&reference, size, 1, 0);
    let frame_b = shifted(&reference, size, 0, 1);
    let frame_c = shifted(&reference, size, 1, 1);
    let uv = vec![128u8; (size / 2) * (size / 2)];

    let planes = [reference, frame_a, frame_b, frame_c];
    let frames: Vec<YuvFrame<'_>> = planes.iter().map(|p| make_frame(p, &uv, size)).collect();

    let mut config = PipelineConfig::default();
    config.tile_width = 48;
    config.tile_height = 48;
    config.overlap = 8;
    config.scale_factor = 2;

    let mut orchestrator = BurstOrchestrator::new(config);
    let result = orchestrator.run_default(&frames).expect("burst should process without error");

    assert!(!result.used_fallback, "reason: {:?}", result.fallback_reason);
    assert_eq!(orchestrator.stage(), BurstStage::Complete);
    assert_eq!(result.image.width(), size * 2);
    assert_eq!(result.image.height(), size * 2);
    for px in result.image.iter() {
        assert!(px.r.is_finite() && px.g.is_finite() && px.b.is_finite());
        assert!((0.0..=1.0).contains(&px.r));
    }
}

#[test]
fn single_frame_burst_falls_back_but_still_upscales_reference() {
    let size = 48usize;
    let reference = checkerboard(size, 4);
    let uv = vec![128u8; (size / 2) * (size / 2)];
    let frames = vec![make_frame(&reference, &uv, size)];

    let mut orchestrator = BurstOrchestrator::new(PipelineConfig::default());
    let result = orchestrator.run_default(&frames).expect("single-frame burst falls back, does not error");

    assert!(result.used_fallback);
    assert_eq!(result.image.width(), size * 2);
    assert_eq!(result.image.height(), size * 2);
}
