//! Tile-based coarse-to-fine aligner (spec §4.4).

use serde::{Deserialize, Serialize};

use crate::buffer::{Byte, Gray, RgbImage};
use crate::error::{BurstSrError, Result};
use crate::motion::{FrameAlignment, MotionField, MotionVector};
use crate::pyramid::GaussianPyramid;
use crate::sampling::{bilinear_sample_gray, bilinear_sample_rgb};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TileAlignerConfig {
    pub tile_size: usize,
    pub search_radius: i32,
    pub pyramid_levels: usize,
    /// Per-tile confidence threshold for `FrameAlignment.valid` (spec §4.4).
    pub confidence_threshold: f32,
    pub use_subpixel: bool,
}

impl Default for TileAlignerConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            search_radius: 16,
            pyramid_levels: 4,
            confidence_threshold: 0.5,
            use_subpixel: false,
        }
    }
}

/// Coarse-to-fine SAD tile aligner. Holds a reference pyramid built once
/// via [`TileAligner::set_reference`] and reused across `align` calls.
pub struct TileAligner {
    config: TileAlignerConfig,
    reference: Option<GaussianPyramid>,
    ref_width: usize,
    ref_height: usize,
}

impl TileAligner {
    pub fn new(config: TileAlignerConfig) -> Self {
        Self {
            config,
            reference: None,
            ref_width: 0,
            ref_height: 0,
        }
    }

    pub fn set_reference(&mut self, reference: &Gray) {
        self.reference = Some(GaussianPyramid::build(reference, self.config.pyramid_levels));
        self.ref_width = reference.width();
        self.ref_height = reference.height();
    }

    pub fn align(&self, target: &Gray) -> Result<FrameAlignment> {
        let ref_pyramid = self.reference.as_ref().ok_or_else(|| BurstSrError::InvalidInput {
            reason: "tile aligner reference not set".to_string(),
        })?;
        if target.width() != self.ref_width || target.height() != self.ref_height {
            return Err(BurstSrError::InvalidInput {
                reason: format!(
                    "target size {}x{} does not match reference {}x{}",
                    target.width(),
                    target.height(),
                    self.ref_width,
                    self.ref_height
                ),
            });
        }

        let tgt_pyramid = GaussianPyramid::build(target, ref_pyramid.depth() - 1);
        let tile_size = self.config.tile_size.max(1);
        let tiles_x = (self.ref_width + tile_size - 1) / tile_size;
        let tiles_y = (self.ref_height + tile_size - 1) / tile_size;
        let tile_count = tiles_x * tiles_y;

        let mut motions = vec![MotionVector::default(); tile_count];
        let mut confidences = vec![0.0f32; tile_count];

        let top_level = ref_pyramid.depth() - 1;
        for level in (0..ref_pyramid.depth()).rev() {
            if level != top_level {
                for m in motions.iter_mut() {
                    m.dx *= 2.0;
                    m.dy *= 2.0;
                }
            }

            let ref_level = &ref_pyramid.levels[level];
            let tgt_level = &tgt_pyramid.levels[level];
            let scale = (1usize << level) as f32;
            let level_half = ((tile_size as f32 / (2.0 * scale)).round() as i32).max(2);

            for ty in 0..tiles_y {
                for tx in 0..tiles_x {
                    let idx = ty * tiles_x + tx;
                    let cx_full = (tx * tile_size + tile_size / 2).min(self.ref_width.saturating_sub(1));
                    let cy_full = (ty * tile_size + tile_size / 2).min(self.ref_height.saturating_sub(1));
                    let cx = (cx_full as f32 / scale).round() as i32;
                    let cy = (cy_full as f32 / scale).round() as i32;

                    let init = motions[idx];
                    let (search, min_sad, second_min_sad) =
                        search_tile(ref_level, tgt_level, cx, cy, level_half, init, self.config.search_radius);

                    let mut motion = MotionVector {
                        dx: init.dx + search.0 as f32,
                        dy: init.dy + search.1 as f32,
                    };

                    if self.config.use_subpixel && level == 0 {
                        if let Some((sub_dx, sub_dy)) =
                            refine_subpixel(ref_level, tgt_level, cx, cy, level_half, search.0, search.1, self.config.search_radius)
                        {
                            motion.dx += sub_dx;
                            motion.dy += sub_dy;
                        }
                    }

                    let confidence = if second_min_sad > 1e-6 {
                        (1.0 - min_sad / second_min_sad).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };

                    motions[idx] = motion;
                    confidences[idx] = confidence;
                }
            }
        }

        let mut field = MotionField::new(tiles_x, tiles_y);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                *field.at_mut(tx, ty) = motions[ty * tiles_x + tx];
            }
        }

        let valid_tiles = confidences.iter().filter(|&&c| c > self.config.confidence_threshold).count();
        let valid = (valid_tiles as f32) >= 0.5 * tile_count.max(1) as f32;
        let avg_dx = motions.iter().map(|m| m.dx).sum::<f32>() / tile_count.max(1) as f32;
        let avg_dy = motions.iter().map(|m| m.dy).sum::<f32>() / tile_count.max(1) as f32;
        let avg_confidence = confidences.iter().sum::<f32>() / tile_count.max(1) as f32;

        Ok(FrameAlignment {
            motion_field: field,
            average_motion: MotionVector { dx: avg_dx, dy: avg_dy },
            confidence: avg_confidence,
            valid,
        })
    }
}

/// Brute-force integer SAD search around `init`, returning the winning
/// search offset plus the min and second-min costs seen (spec §4.4).
fn search_tile(
    reference: &Gray,
    target: &Gray,
    cx: i32,
    cy: i32,
    half: i32,
    init: MotionVector,
    radius: i32,
) -> ((i32, i32), f32, f32) {
    let mut best = (0i32, 0i32);
    let mut best_sad = f32::INFINITY;
    let mut second_sad = f32::INFINITY;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let sad = tile_sad(reference, target, cx, cy, init.dx as i32 + dx, init.dy as i32 + dy, half);

            let better = sad < best_sad
                || (sad == best_sad
                    && (dx.abs() + dy.abs() < best.0.abs() + best.1.abs()
                        || (dx.abs() + dy.abs() == best.0.abs() + best.1.abs()
                            && (dy < best.1 || (dy == best.1 && dx < best.0)))));

            if better {
                if best_sad.is_finite() {
                    second_sad = second_sad.min(best_sad);
                }
                best_sad = sad;
                best = (dx, dy);
            } else if sad < second_sad {
                second_sad = sad;
            }
        }
    }

    (best, best_sad, second_sad)
}

fn tile_sad(reference: &Gray, target: &Gray, cx: i32, cy: i32, dx: i32, dy: i32, half: i32) -> f32 {
    let mut sad = 0.0f32;
    for wy in -half..=half {
        for wx in -half..=half {
            let rx = (cx + wx).clamp(0, reference.width() as i32 - 1) as usize;
            let ry = (cy + wy).clamp(0, reference.height() as i32 - 1) as usize;
            let tx = (cx + dx + wx).clamp(0, target.width() as i32 - 1) as usize;
            let ty = (cy + dy + wy).clamp(0, target.height() as i32 - 1) as usize;
            sad += (reference.at(rx, ry) - target.at(tx, ty)).abs();
        }
    }
    sad
}

/// Parabolic sub-pixel refinement around the winning integer offset;
/// rejects if the vertex falls outside `±1` of the minimum (spec §4.4).
fn refine_subpixel(
    reference: &Gray,
    target: &Gray,
    cx: i32,
    cy: i32,
    half: i32,
    best_dx: i32,
    best_dy: i32,
    radius: i32,
) -> Option<(f32, f32)> {
    if best_dx.abs() >= radius || best_dy.abs() >= radius {
        return None;
    }
    let s = |dx: i32, dy: i32| tile_sad(reference, target, cx, cy, dx, dy, half);

    let x_prev = s(best_dx - 1, best_dy);
    let x_curr = s(best_dx, best_dy);
    let x_next = s(best_dx + 1, best_dy);
    let denom_x = x_prev - 2.0 * x_curr + x_next;
    let sub_dx = if denom_x.abs() > 1e-9 { (x_prev - x_next) / (2.0 * denom_x) } else { 0.0 };

    let y_prev = s(best_dx, best_dy - 1);
    let y_curr = x_curr;
    let y_next = s(best_dx, best_dy + 1);
    let denom_y = y_prev - 2.0 * y_curr + y_next;
    let sub_dy = if denom_y.abs() > 1e-9 { (y_prev - y_next) / (2.0 * denom_y) } else { 0.0 };

    if sub_dx.abs() > 1.0 || sub_dy.abs() > 1.0 {
        return None;
    }
    Some((sub_dx, sub_dy))
}

/// Per-pixel nearest-tile warp, clamp-to-edge bilinear sample at
/// `(x + dx, y + dy)`: `search_tile` defines `motion` such that
/// `reference(x,y) = target(x+dx, y+dy)`, so reconstructing the reference
/// from `input` (the target) means sampling forward by `motion`, not
/// backward (spec §4.4).
pub fn warp_gray(input: &Gray, alignment: &FrameAlignment, tile_size: usize) -> Gray {
    let (w, h) = (input.width(), input.height());
    let mut out = Gray::new(w, h);
    let field = &alignment.motion_field;
    for y in 0..h {
        for x in 0..w {
            let motion = nearest_tile_motion(field, x, y, tile_size);
            *out.at_mut(x, y) = bilinear_sample_gray(input, x as f64 + motion.dx as f64, y as f64 + motion.dy as f64);
        }
    }
    out
}

/// RGB counterpart of [`warp_gray`].
pub fn warp_rgb(input: &RgbImage, alignment: &FrameAlignment, tile_size: usize) -> RgbImage {
    let (w, h) = (input.width(), input.height());
    let mut out = RgbImage::new(w, h);
    let field = &alignment.motion_field;
    for y in 0..h {
        for x in 0..w {
            let motion = nearest_tile_motion(field, x, y, tile_size);
            *out.at_mut(x, y) = bilinear_sample_rgb(input, x as f64 + motion.dx as f64, y as f64 + motion.dy as f64);
        }
    }
    out
}

fn nearest_tile_motion(field: &MotionField, x: usize, y: usize, tile_size: usize) -> MotionVector {
    let tile_size = tile_size.max(1);
    let tx = (x / tile_size).min(field.width().saturating_sub(1));
    let ty = (y / tile_size).min(field.height().saturating_sub(1));
    *field.at(tx, ty)
}

/// Also exposes a byte-mask warp for detail masks carried alongside RGB;
/// nearest-neighbor (no interpolation) since masks are binary. Same
/// forward-sampling convention as [`warp_gray`].
pub fn warp_mask_nearest(input: &Byte, alignment: &FrameAlignment, tile_size: usize) -> Byte {
    let (w, h) = (input.width(), input.height());
    let mut out = Byte::new(w, h);
    let field = &alignment.motion_field;
    for y in 0..h {
        for x in 0..w {
            let motion = nearest_tile_motion(field, x, y, tile_size);
            let sx = (x as f32 + motion.dx).round().clamp(0.0, w as f32 - 1.0) as usize;
            let sy = (y as f32 + motion.dy).round().clamp(0.0, h as f32 - 1.0) as usize;
            *out.at_mut(x, y) = *input.at(sx, sy);
        }
    }
    out
}
