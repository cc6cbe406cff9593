//! Edge detector and tile-based detail mask (spec §4.3).

use crate::buffer::{Byte, Gray};

/// Gradient operator selection (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeOperator {
    Sobel,
    /// Normalized by 1/32 (spec §4.3, resolved in DESIGN.md open question 3).
    Scharr,
    Prewitt,
}

impl EdgeOperator {
    fn kernels(self) -> ([[f32; 3]; 3], [[f32; 3]; 3]) {
        match self {
            EdgeOperator::Sobel => (
                [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]],
                [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]],
            ),
            EdgeOperator::Scharr => {
                let s = 1.0 / 32.0;
                (
                    [
                        [-3.0 * s, 0.0, 3.0 * s],
                        [-10.0 * s, 0.0, 10.0 * s],
                        [-3.0 * s, 0.0, 3.0 * s],
                    ],
                    [
                        [-3.0 * s, -10.0 * s, -3.0 * s],
                        [0.0, 0.0, 0.0],
                        [3.0 * s, 10.0 * s, 3.0 * s],
                    ],
                )
            }
            EdgeOperator::Prewitt => (
                [[-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]],
                [[-1.0, -1.0, -1.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]],
            ),
        }
    }
}

/// Horizontal/vertical gradient pair.
#[derive(Clone, Debug)]
pub struct GradientField {
    pub gx: Gray,
    pub gy: Gray,
}

/// Compute gradients with the given operator. Border pixels are zero
/// (spec §4.3 — no clamp-to-edge here, unlike sampling elsewhere).
pub fn gradients(data: &Gray, op: EdgeOperator) -> GradientField {
    let (w, h) = (data.width(), data.height());
    let (kx, ky) = op.kernels();

    let mut gx = Gray::new(w, h);
    let mut gy = Gray::new(w, h);

    if w < 3 || h < 3 {
        return GradientField { gx, gy };
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut sx = 0.0f32;
            let mut sy = 0.0f32;
            for (dy, (krow_x, krow_y)) in kx.iter().zip(ky.iter()).enumerate() {
                for (dx, (&kvx, &kvy)) in krow_x.iter().zip(krow_y.iter()).enumerate() {
                    let sample = *data.at(x + dx - 1, y + dy - 1);
                    sx += sample * kvx;
                    sy += sample * kvy;
                }
            }
            *gx.at_mut(x, y) = sx;
            *gy.at_mut(x, y) = sy;
        }
    }

    GradientField { gx, gy }
}

/// Gradient magnitude `sqrt(gx^2 + gy^2)`.
pub fn magnitude(field: &GradientField) -> Gray {
    let (w, h) = (field.gx.width(), field.gx.height());
    let mut out = Gray::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let gx = *field.gx.at(x, y);
            let gy = *field.gy.at(x, y);
            *out.at_mut(x, y) = (gx * gx + gy * gy).sqrt();
        }
    }
    out
}

/// Tile-based detail mask: per tile, skip NaN/Inf, clamp negatives to 0,
/// compute the mean; `detail = mean >= threshold` yields 255 else 0
/// (spec §4.3).
pub fn detail_mask(data: &Gray, tile_size: usize, threshold: f32) -> Byte {
    let (w, h) = (data.width(), data.height());
    let mut out = Byte::new(w, h);
    if tile_size == 0 {
        return out;
    }

    let mut ty = 0;
    while ty < h {
        let tile_h = tile_size.min(h - ty);
        let mut tx = 0;
        while tx < w {
            let tile_w = tile_size.min(w - tx);

            let mut sum = 0.0f64;
            let mut count = 0u64;
            for y in ty..ty + tile_h {
                for x in tx..tx + tile_w {
                    let v = *data.at(x, y);
                    if v.is_finite() {
                        sum += v.max(0.0) as f64;
                        count += 1;
                    }
                }
            }
            let mean = if count > 0 { (sum / count as f64) as f32 } else { 0.0 };
            let value: u8 = if mean >= threshold { 255 } else { 0 };

            for y in ty..ty + tile_h {
                for x in tx..tx + tile_w {
                    *out.at_mut(x, y) = value;
                }
            }

            tx += tile_size;
        }
        ty += tile_size;
    }

    out
}

/// Binary dilation with a square structuring element of radius `r`: a
/// pixel becomes set if any pixel within `[-r,r]` in both axes is set
/// (spec §4.3; generalizes the teacher's fixed 3x3 `dilate`).
pub fn dilate(mask: &Byte, radius: usize) -> Byte {
    morphology(mask, radius, true)
}

/// Binary erosion, symmetric counterpart to [`dilate`]: a pixel stays set
/// only if every pixel within `[-r,r]` in both axes is set.
pub fn erode(mask: &Byte, radius: usize) -> Byte {
    morphology(mask, radius, false)
}

fn morphology(mask: &Byte, radius: usize, is_dilate: bool) -> Byte {
    let (w, h) = (mask.width(), mask.height());
    let mut out = Byte::new(w, h);
    let r = radius as isize;

    for y in 0..h {
        for x in 0..w {
            let mut result = !is_dilate;
            'scan: for dy in -r..=r {
                for dx in -r..=r {
                    let nx = x as isize + dx;
                    let ny = y as isize + dy;
                    let set = if nx >= 0 && nx < w as isize && ny >= 0 && ny < h as isize {
                        *mask.at(nx as usize, ny as usize) != 0
                    } else {
                        false
                    };
                    if is_dilate && set {
                        result = true;
                        break 'scan;
                    }
                    if !is_dilate && !set {
                        result = false;
                        break 'scan;
                    }
                }
            }
            *out.at_mut(x, y) = if result { 255 } else { 0 };
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradients_are_zero_on_border() {
        let img = Gray::new(5, 5);
        let g = gradients(&img, EdgeOperator::Sobel);
        for x in 0..5 {
            assert_eq!(*g.gx.at(x, 0), 0.0);
            assert_eq!(*g.gx.at(x, 4), 0.0);
        }
    }

    #[test]
    fn vertical_edge_produces_horizontal_gradient() {
        let mut img = Gray::new(5, 5);
        for y in 0..5 {
            for x in 0..5 {
                *img.at_mut(x, y) = if x >= 3 { 1.0 } else { 0.0 };
            }
        }
        let g = gradients(&img, EdgeOperator::Sobel);
        let mag = magnitude(&g);
        assert!(*mag.at(2, 2) > 0.0);
        assert_eq!(*mag.at(0, 2), 0.0);
    }

    #[test]
    fn detail_mask_flags_high_mean_tiles() {
        let mut img = Gray::new(4, 4);
        for y in 0..2 {
            for x in 0..2 {
                *img.at_mut(x, y) = 1.0;
            }
        }
        let mask = detail_mask(&img, 2, 0.5);
        assert_eq!(*mask.at(0, 0), 255);
        assert_eq!(*mask.at(3, 3), 0);
    }

    #[test]
    fn dilate_then_erode_is_idempotent_on_solid_block() {
        let mut mask = Byte::new(6, 6);
        for y in 1..5 {
            for x in 1..5 {
                *mask.at_mut(x, y) = 255;
            }
        }
        let dilated = dilate(&mask, 1);
        let eroded = erode(&dilated, 1);
        assert_eq!(*eroded.at(2, 2), 255);
    }
}
