//! Overlapping-tile grid, per-tile align+merge+drizzle+anisotropic-filter,
//! and linear-ramp overlap blending into a shared weight map (spec §4.11).
//! No direct teacher analogue (the teacher streams whole frames); grounded
//! on the teacher's row-parallel accumulate-then-normalize idiom used
//! throughout `stack/` and on `drizzle.rs`'s own accumulator pattern.

use rayon::prelude::*;

use crate::align::{align, AlignmentMode, AlignmentOutput};
use crate::buffer::{Gray, Rgb, RgbImage};
use crate::color::luminance;
use crate::drizzle::{drizzle_stack, shifts_from_homographies, DrizzleConfig};
use crate::merge::{merge_frames, MergeConfig, MergeMethod};
use crate::motion::{FlowField, Homography};
use crate::pipeline::config::{PipelineConfig, RobustnessMode};
use crate::sampling::bilinear_sample_rgb;

/// One tile's core (non-overlap) region and its padded (overlap-extended,
/// edge-clamped) crop region, both in reference-frame input coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Tile {
    pub core_x0: usize,
    pub core_y0: usize,
    pub core_x1: usize,
    pub core_y1: usize,
    pub pad_x0: usize,
    pub pad_y0: usize,
    pub pad_x1: usize,
    pub pad_y1: usize,
}

impl Tile {
    fn pad_left(&self) -> usize {
        self.core_x0 - self.pad_x0
    }
    fn pad_right(&self) -> usize {
        self.pad_x1 - self.core_x1
    }
    fn pad_top(&self) -> usize {
        self.core_y0 - self.pad_y0
    }
    fn pad_bottom(&self) -> usize {
        self.pad_y1 - self.core_y1
    }
}

/// Build the tile grid covering a `width x height` image (spec §4.11).
pub fn build_tile_grid(width: usize, height: usize, tile_width: usize, tile_height: usize, overlap: usize) -> Vec<Tile> {
    let tile_width = tile_width.max(1);
    let tile_height = tile_height.max(1);
    let mut tiles = Vec::new();

    let mut cy0 = 0;
    while cy0 < height {
        let cy1 = (cy0 + tile_height).min(height);
        let mut cx0 = 0;
        while cx0 < width {
            let cx1 = (cx0 + tile_width).min(width);

            tiles.push(Tile {
                core_x0: cx0,
                core_y0: cy0,
                core_x1: cx1,
                core_y1: cy1,
                pad_x0: cx0.saturating_sub(overlap),
                pad_y0: cy0.saturating_sub(overlap),
                pad_x1: (cx1 + overlap).min(width),
                pad_y1: (cy1 + overlap).min(height),
            });

            cx0 = cx1;
        }
        cy0 = cy1;
    }
    tiles
}

fn crop_gray(src: &Gray, x0: usize, y0: usize, x1: usize, y1: usize) -> Gray {
    let (w, h) = (x1 - x0, y1 - y0);
    let mut out = Gray::new(w, h);
    for y in 0..h {
        for x in 0..w {
            *out.at_mut(x, y) = *src.at(x0 + x, y0 + y);
        }
    }
    out
}

fn crop_rgb(src: &RgbImage, x0: usize, y0: usize, x1: usize, y1: usize) -> RgbImage {
    let (w, h) = (x1 - x0, y1 - y0);
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            *out.at_mut(x, y) = *src.at(x0 + x, y0 + y);
        }
    }
    out
}

/// Linear-ramp blend weight for one axis: 0 at the outer pad edge rising
/// to 1 across the pad band, 1 through the core, symmetric on the far
/// side (spec §4.11 `min(dx, dy, overlap-dx, overlap-dy)/overlap`, applied
/// per axis since no neighbor exists where `pad == 0`, i.e. at image edges).
fn axis_weight(local: usize, pad_before: usize, pad_after: usize, len: usize) -> f32 {
    let left = if pad_before > 0 {
        ((local + 1) as f32 / (pad_before as f32 + 1.0)).min(1.0)
    } else {
        1.0
    };
    let dist_from_right = len - 1 - local;
    let right = if pad_after > 0 {
        ((dist_from_right + 1) as f32 / (pad_after as f32 + 1.0)).min(1.0)
    } else {
        1.0
    };
    left.min(right)
}

/// Derive per-frame translation homographies from an alignment output,
/// treating tile/flow results as their average motion (spec §9's Hybrid
/// convention, reused here so every alignment mode can feed the same
/// warp/drizzle code path).
fn homography_from_output(output: &AlignmentOutput) -> (Homography, Option<FlowField>) {
    match output {
        AlignmentOutput::Global(h) => (*h, None),
        AlignmentOutput::Tile(frame) => {
            let mut h = Homography::identity();
            h.m[0][2] = frame.average_motion.dx;
            h.m[1][2] = frame.average_motion.dy;
            (h, None)
        }
        AlignmentOutput::Flow(field) => (Homography::identity(), Some(field.clone())),
    }
}

/// `(dx,dy)` is a forward reference->target offset (`reference(x,y) =
/// target(x+dx,y+dy)`, same convention as `align::tile::warp_gray`), so
/// reconstructing the reference from `input` (the target) samples forward.
fn warp_rgb_translation(input: &RgbImage, dx: f32, dy: f32) -> RgbImage {
    let (w, h) = (input.width(), input.height());
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            *out.at_mut(x, y) = bilinear_sample_rgb(input, x as f64 + dx as f64, y as f64 + dy as f64);
        }
    }
    out
}

fn warp_rgb_flow(input: &RgbImage, flow: &FlowField) -> RgbImage {
    let (w, h) = (input.width(), input.height());
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let v = flow.at(x.min(flow.width() - 1), y.min(flow.height() - 1));
            *out.at_mut(x, y) = bilinear_sample_rgb(input, x as f64 + v.dx as f64, y as f64 + v.dy as f64);
        }
    }
    out
}

fn flow_confidence_map(flow: &FlowField, w: usize, h: usize) -> Gray {
    let mut out = Gray::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let v = flow.at(x.min(flow.width().saturating_sub(1)), y.min(flow.height().saturating_sub(1)));
            *out.at_mut(x, y) = v.confidence;
        }
    }
    out
}

/// Per-pixel adaptive Huber/Tukey location estimate across `frames`, with
/// delta/c scaled by `confidence` when present (spec §4.11 "Adaptive
/// robustness"), reusing the channel-independent IRLS shape from
/// `merge::huber_estimate`.
fn adaptive_robust_merge(frames: &[RgbImage], confidence: Option<&Gray>, base_threshold: f32, tukey: bool) -> RgbImage {
    let (w, h) = (frames[0].width(), frames[0].height());
    let mut out = RgbImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let conf = confidence.map(|c| *c.at(x, y)).unwrap_or(0.0);
            let threshold = base_threshold * (0.5 + 0.5 * conf);

            let r: Vec<f32> = frames.iter().map(|f| f.at(x, y).r).collect();
            let g: Vec<f32> = frames.iter().map(|f| f.at(x, y).g).collect();
            let b: Vec<f32> = frames.iter().map(|f| f.at(x, y).b).collect();

            *out.at_mut(x, y) = Rgb::new(
                adaptive_channel(&r, threshold, tukey),
                adaptive_channel(&g, threshold, tukey),
                adaptive_channel(&b, threshold, tukey),
            );
        }
    }
    out
}

fn adaptive_channel(values: &[f32], threshold: f32, tukey: bool) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let mut estimate = if n % 2 == 0 { (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0 } else { sorted[n / 2] };

    for _ in 0..10 {
        let mut weight_sum = 0.0f32;
        let mut weighted = 0.0f32;
        for &v in values {
            let r = v - estimate;
            let weight = if tukey {
                if r.abs() < threshold {
                    let t = r / threshold;
                    (1.0 - t * t).powi(2)
                } else {
                    0.0
                }
            } else if r.abs() <= threshold {
                1.0
            } else {
                threshold / r.abs()
            };
            weight_sum += weight;
            weighted += weight * v;
        }
        if weight_sum < 1e-9 {
            break;
        }
        let next = weighted / weight_sum;
        if (next - estimate).abs() < 1e-4 {
            estimate = next;
            break;
        }
        estimate = next;
    }
    estimate
}

fn upscale_rgb(src: &RgbImage, scale: usize) -> RgbImage {
    let (w, h) = (src.width(), src.height());
    let (out_w, out_h) = (w * scale, h * scale);
    let mut out = RgbImage::new(out_w, out_h);
    for oy in 0..out_h {
        let sy = (oy as f64 + 0.5) / scale as f64 - 0.5;
        for ox in 0..out_w {
            let sx = (ox as f64 + 0.5) / scale as f64 - 0.5;
            *out.at_mut(ox, oy) = bilinear_sample_rgb(src, sx, sy);
        }
    }
    out
}

/// Process one tile end to end: align every non-reference frame against
/// the tile's reference crop, warp, merge or drizzle, anisotropic-filter,
/// and return the up-scaled padded-tile result alongside its weight map
/// (spec §4.11).
pub fn process_tile(
    tile: &Tile,
    rgb_frames: &[RgbImage],
    luma_frames: &[Gray],
    reference_index: usize,
    config: &PipelineConfig,
    seed: u64,
) -> RgbImage {
    let crop_rgb_frames: Vec<RgbImage> = rgb_frames
        .iter()
        .map(|f| crop_rgb(f, tile.pad_x0, tile.pad_y0, tile.pad_x1, tile.pad_y1))
        .collect();
    let crop_luma_frames: Vec<Gray> = luma_frames
        .iter()
        .map(|f| crop_gray(f, tile.pad_x0, tile.pad_y0, tile.pad_x1, tile.pad_y1))
        .collect();

    let mode = alignment_mode(config);
    let reference_luma = &crop_luma_frames[reference_index];

    let mut warped: Vec<RgbImage> = Vec::with_capacity(crop_rgb_frames.len());
    let mut homographies: Vec<Homography> = Vec::with_capacity(crop_rgb_frames.len());
    let mut flow_conf: Option<Gray> = None;

    for (i, target_luma) in crop_luma_frames.iter().enumerate() {
        if i == reference_index {
            warped.push(crop_rgb_frames[i].clone());
            homographies.push(Homography::identity());
            continue;
        }
        match align(reference_luma, target_luma, &mode, None, seed.wrapping_add(i as u64)) {
            Ok(output) => {
                let (h, flow) = homography_from_output(&output);
                let w = match &flow {
                    Some(field) => {
                        if flow_conf.is_none() {
                            flow_conf = Some(flow_confidence_map(field, reference_luma.width(), reference_luma.height()));
                        }
                        warp_rgb_flow(&crop_rgb_frames[i], field)
                    }
                    None => warp_rgb_translation(&crop_rgb_frames[i], h.m[0][2], h.m[1][2]),
                };
                warped.push(w);
                homographies.push(h);
            }
            Err(_) => {
                // Alignment failure for this one frame: fall back to an
                // unwarped copy rather than dropping the tile entirely.
                warped.push(crop_rgb_frames[i].clone());
                homographies.push(Homography::identity());
            }
        }
    }

    // "None" robustness means no adaptive estimator override: accumulate
    // sub-pixel contributions directly via drizzle. Drizzle performs its
    // own alignment from `shifts`, so it takes the raw (unwarped) crops —
    // feeding it `warped` would double-apply the shift already baked into
    // `warp_rgb_translation`/`warp_rgb_flow` above. Huber/Tukey instead
    // merge the already-warped frames onto the tile's native grid and
    // bilinear-upscale (spec §4.11 "run drizzle or robust merge").
    let result = if matches!(config.robustness, RobustnessMode::None) {
        let shifts = shifts_from_homographies(&homographies, reference_index);
        let drizzle_config = DrizzleConfig { scale_factor: config.scale_factor, ..config.drizzle };
        if let Ok(drizzled) = drizzle_stack(&crop_rgb_frames, &shifts, &drizzle_config) {
            drizzled
        } else {
            let merged = merge_frames(&warped, None, &MergeConfig { method: MergeMethod::Average, ..config.merge }).unwrap_or_else(|_| warped[0].clone());
            upscale_rgb(&merged, config.scale_factor as usize)
        }
    } else {
        let merged = match config.robustness {
            RobustnessMode::None => unreachable!(),
            RobustnessMode::Huber => adaptive_robust_merge(&warped, flow_conf.as_ref(), config.robustness_threshold, false),
            RobustnessMode::Tukey => adaptive_robust_merge(&warped, flow_conf.as_ref(), config.robustness_threshold, true),
        };
        upscale_rgb(&merged, config.scale_factor as usize)
    };

    apply_aniso_filter(result, &config.aniso)
}

/// Post-merge/post-drizzle anisotropic filter step (spec §4.9's place in
/// the data flow: "merger or drizzle accumulates -> anisotropic filter ->
/// output image"). Runs `aniso_merge` over the single already-merged tile
/// image, using its own luminance as the structure-tensor driver, and
/// falls back to the unfiltered image if the single-frame call ever errors.
fn apply_aniso_filter(image: RgbImage, config: &crate::aniso::AnisoMergeConfig) -> RgbImage {
    let luma = luminance(&image);
    match crate::aniso::aniso_merge(std::slice::from_ref(&image), &luma, config) {
        Ok(filtered) => filtered,
        Err(_) => image,
    }
}

fn alignment_mode(config: &PipelineConfig) -> AlignmentMode {
    use crate::pipeline::config::AlignmentMethod;
    match config.alignment_method {
        AlignmentMethod::DenseFlow => AlignmentMode::DenseFlow(config.flow),
        AlignmentMethod::PhaseCorr => AlignmentMode::Hybrid { phase: config.phase, flow: None },
        AlignmentMethod::Hybrid => AlignmentMode::Hybrid { phase: config.phase, flow: Some(config.flow) },
    }
}

/// Drive every tile (in parallel) and blend the up-scaled results into a
/// single output image via the shared weight map (spec §4.11, §5).
pub fn run_tile_pipeline(
    rgb_frames: &[RgbImage],
    reference_index: usize,
    config: &PipelineConfig,
    seed: u64,
) -> RgbImage {
    let (w, h) = (rgb_frames[reference_index].width(), rgb_frames[reference_index].height());
    let luma_frames: Vec<Gray> = rgb_frames.iter().map(luminance).collect();
    let tiles = build_tile_grid(w, h, config.tile_width, config.tile_height, config.overlap);
    let scale = config.scale_factor as usize;
    let (out_w, out_h) = (w * scale, h * scale);

    let tile_results: Vec<(Tile, RgbImage)> = tiles
        .par_iter()
        .map(|tile| (*tile, process_tile(tile, rgb_frames, &luma_frames, reference_index, config, seed)))
        .collect();

    let mut accum = vec![Rgb::BLACK; out_w * out_h];
    let mut weights = vec![0.0f32; out_w * out_h];

    for (tile, result) in &tile_results {
        let pad_w = tile.pad_x1 - tile.pad_x0;
        let pad_h = tile.pad_y1 - tile.pad_y0;
        let pad_left = tile.pad_left();
        let pad_right = tile.pad_right();
        let pad_top = tile.pad_top();
        let pad_bottom = tile.pad_bottom();

        for ly in 0..pad_h {
            let wy = axis_weight(ly, pad_top, pad_bottom, pad_h);
            for lx in 0..pad_w {
                let wx = axis_weight(lx, pad_left, pad_right, pad_w);
                let weight = wx * wy;
                if weight <= 0.0 {
                    continue;
                }
                let gx = tile.pad_x0 + lx;
                let gy = tile.pad_y0 + ly;

                for sy in 0..scale {
                    let oy = gy * scale + sy;
                    for sx in 0..scale {
                        let ox = gx * scale + sx;
                        let idx = oy * out_w + ox;
                        let value = *result.at(lx * scale + sx, ly * scale + sy);
                        accum[idx] = accum[idx] + value * weight;
                        weights[idx] += weight;
                    }
                }
            }
        }
    }

    let mut out = RgbImage::new(out_w, out_h);
    for i in 0..accum.len() {
        let w = weights[i];
        let y = i / out_w;
        let x = i % out_w;
        *out.at_mut(x, y) = if w > 1e-6 { (accum[i] * (1.0 / w)).sanitized() } else { Rgb::BLACK };
    }
    out
}

/// Single-frame bilinear ×scale upscale of the reference (spec §4.11
/// fallback path).
pub fn bilinear_fallback(reference: &RgbImage, scale: u32) -> RgbImage {
    upscale_rgb(reference, scale as usize)
}

/// Rough per-tile peak memory estimate in bytes: every frame's padded RGB
/// crop plus its up-scaled output, in 32-bit floats (spec §4.11 "memory
/// budget would be exceeded").
pub fn estimate_tile_memory_bytes(tile_width: usize, tile_height: usize, overlap: usize, frame_count: usize, scale: u32) -> usize {
    let padded = (tile_width + 2 * overlap) * (tile_height + 2 * overlap);
    let scaled_out = tile_width * scale as usize * tile_height * scale as usize;
    let bytes_per_rgb_pixel = 3 * 4;
    padded * frame_count * bytes_per_rgb_pixel + scaled_out * bytes_per_rgb_pixel
}

/// Sobel gradient-magnitude-mean sharpness score, used purely as a
/// diagnostic to explain why a burst fell back or merged poorly (spec
/// §4.14). Does not influence reference selection or merge ordering.
pub fn frame_quality_score(luma: &Gray) -> f64 {
    let (w, h) = (luma.width(), luma.height());
    if w < 3 || h < 3 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let tl = *luma.at(x - 1, y - 1) as f64;
            let tr = *luma.at(x + 1, y - 1) as f64;
            let ml = *luma.at(x - 1, y) as f64;
            let mr = *luma.at(x + 1, y) as f64;
            let bl = *luma.at(x - 1, y + 1) as f64;
            let br = *luma.at(x + 1, y + 1) as f64;
            let tc = *luma.at(x, y - 1) as f64;
            let bc = *luma.at(x, y + 1) as f64;
            let gx = -tl + tr - 2.0 * ml + 2.0 * mr - bl + br;
            let gy = -tl - 2.0 * tc - tr + bl + 2.0 * bc + br;
            sum += (gx * gx + gy * gy).sqrt();
        }
    }
    sum / ((w - 2) * (h - 2)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharper_frame_scores_higher_than_flat_frame() {
        let flat = Gray::new(16, 16);
        let mut textured = Gray::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                *textured.at_mut(x, y) = if (x + y) % 2 == 0 { 1.0 } else { 0.0 };
            }
        }
        assert_eq!(frame_quality_score(&flat), 0.0);
        assert!(frame_quality_score(&textured) > 0.0);
    }

    #[test]
    fn grid_covers_image_exactly_once_in_core_regions() {
        let tiles = build_tile_grid(100, 100, 32, 32, 8);
        let mut covered = vec![false; 100 * 100];
        for t in &tiles {
            for y in t.core_y0..t.core_y1 {
                for x in t.core_x0..t.core_x1 {
                    assert!(!covered[y * 100 + x], "pixel {x},{y} covered twice");
                    covered[y * 100 + x] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn axis_weight_is_one_in_core_and_ramps_in_overlap() {
        // len=20, pad_before=4, pad_after=4 => core is [4,16).
        assert!((axis_weight(10, 4, 4, 20) - 1.0).abs() < 1e-6);
        assert!(axis_weight(0, 4, 4, 20) < axis_weight(2, 4, 4, 20));
        assert!(axis_weight(2, 4, 4, 20) < axis_weight(4, 4, 4, 20));
    }

    #[test]
    fn axis_weight_is_full_at_image_edge_with_no_neighbor() {
        assert_eq!(axis_weight(0, 0, 4, 20), 1.0);
    }

    #[test]
    fn identical_frames_tile_pipeline_reproduces_upscaled_reference() {
        let mut img = RgbImage::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                let v = ((x + y) % 5) as f32 / 5.0;
                *img.at_mut(x, y) = Rgb::new(v, v, v);
            }
        }
        let frames = vec![img.clone(), img.clone(), img.clone()];
        let mut config = PipelineConfig::default();
        config.tile_width = 32;
        config.tile_height = 32;
        config.overlap = 8;
        config.scale_factor = 2;
        let out = run_tile_pipeline(&frames, 0, &config, 42);
        assert_eq!(out.width(), 128);
        assert_eq!(out.height(), 128);
        for px in out.iter() {
            assert!(px.r.is_finite() && px.r >= 0.0 && px.r <= 1.0);
        }
    }
}
