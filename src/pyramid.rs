//! Multi-scale Gaussian/Laplacian pyramid (spec §4.2).

use crate::buffer::Gray;
use crate::consts::{PYRAMID_KERNEL, PYRAMID_MIN_DIM};
use crate::filters::{convolve_cols_clamped, convolve_rows_clamped};
use crate::sampling::bilinear_sample_gray;

/// Ordered sequence of buffers, level 0 = original; each subsequent level
/// is half the size after a 5-tap separable Gaussian blur (spec §3).
#[derive(Clone, Debug)]
pub struct GaussianPyramid {
    pub levels: Vec<Gray>,
}

impl GaussianPyramid {
    /// Build up to `max_levels` additional levels beyond level 0, stopping
    /// early if the next level would fall below 4x4.
    pub fn build(img: &Gray, max_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(max_levels + 1);
        levels.push(img.clone());

        let mut current = img.clone();
        for _ in 0..max_levels {
            let (w, h) = (current.width(), current.height());
            let nw = w / 2;
            let nh = h / 2;
            if nw < PYRAMID_MIN_DIM || nh < PYRAMID_MIN_DIM {
                break;
            }
            let blurred = gaussian_blur_5tap(&current);
            current = downsample_2x(&blurred);
            levels.push(current.clone());
        }

        Self { levels }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Detail pyramid: `detail_i = gaussian_i - upsample(gaussian_{i+1})`,
/// plus the coarsest Gaussian level as the residual (spec §3, §4.2).
#[derive(Clone, Debug)]
pub struct LaplacianPyramid {
    /// Per-level detail, finest first.
    pub details: Vec<Gray>,
    /// The coarsest Gaussian level.
    pub residual: Gray,
}

impl LaplacianPyramid {
    pub fn build(gaussian: &GaussianPyramid) -> Self {
        let n = gaussian.levels.len();
        if n == 0 {
            return Self {
                details: Vec::new(),
                residual: Gray::new(0, 0),
            };
        }
        let mut details = Vec::with_capacity(n.saturating_sub(1));
        for i in 0..n.saturating_sub(1) {
            let target = &gaussian.levels[i];
            let up = upsample_bilinear(&gaussian.levels[i + 1], target.width(), target.height());
            details.push(subtract(target, &up));
        }
        Self {
            details,
            residual: gaussian.levels[n - 1].clone(),
        }
    }

    /// Reconstruct the original image. Exact up to rounding (spec §8.2).
    pub fn reconstruct(&self) -> Gray {
        let mut current = self.residual.clone();
        for detail in self.details.iter().rev() {
            let up = upsample_bilinear(&current, detail.width(), detail.height());
            current = add(detail, &up);
        }
        current
    }
}

fn subtract(a: &Gray, b: &Gray) -> Gray {
    let mut out = Gray::new(a.width(), a.height());
    for y in 0..a.height() {
        for x in 0..a.width() {
            *out.at_mut(x, y) = a.at(x, y) - b.at(x, y);
        }
    }
    out
}

fn add(a: &Gray, b: &Gray) -> Gray {
    let mut out = Gray::new(a.width(), a.height());
    for y in 0..a.height() {
        for x in 0..a.width() {
            *out.at_mut(x, y) = a.at(x, y) + b.at(x, y);
        }
    }
    out
}

/// Bilinear-upsample `src` to `(target_w, target_h)` with clamp-to-edge
/// boundaries (spec §4.2).
pub fn upsample_bilinear(src: &Gray, target_w: usize, target_h: usize) -> Gray {
    let mut out = Gray::new(target_w, target_h);
    let (sw, sh) = (src.width(), src.height());
    for y in 0..target_h {
        let sy = if target_h > 1 {
            (y as f64 + 0.5) * sh as f64 / target_h as f64 - 0.5
        } else {
            0.0
        };
        for x in 0..target_w {
            let sx = if target_w > 1 {
                (x as f64 + 0.5) * sw as f64 / target_w as f64 - 0.5
            } else {
                0.0
            };
            *out.at_mut(x, y) = bilinear_sample_gray(src, sx, sy);
        }
    }
    out
}

/// Downsample by 2x: blur with the 5-tap kernel, then take even indices.
fn downsample_2x(blurred: &Gray) -> Gray {
    let (w, h) = (blurred.width(), blurred.height());
    let nw = w / 2;
    let nh = h / 2;
    let mut out = Gray::new(nw, nh);
    for y in 0..nh {
        for x in 0..nw {
            *out.at_mut(x, y) = *blurred.at(x * 2, y * 2);
        }
    }
    out
}

/// Separable 5-tap Gaussian blur `[1,4,6,4,1]/16` with clamp-to-edge
/// boundaries (spec §3).
pub fn gaussian_blur_5tap(data: &Gray) -> Gray {
    let row_pass = convolve_rows_clamped(data, &PYRAMID_KERNEL);
    convolve_cols_clamped(&row_pass, &PYRAMID_KERNEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: usize, h: usize) -> Gray {
        let mut img = Gray::new(w, h);
        for y in 0..h {
            for x in 0..w {
                *img.at_mut(x, y) = x as f32 / (w - 1).max(1) as f32;
            }
        }
        img
    }

    #[test]
    fn pyramid_levels_shrink_by_half_and_stop_below_4x4() {
        let img = gradient_image(64, 64);
        let pyr = GaussianPyramid::build(&img, 10);
        assert_eq!(pyr.levels[0].width(), 64);
        assert_eq!(pyr.levels[1].width(), 32);
        assert_eq!(pyr.levels[2].width(), 16);
        assert_eq!(pyr.levels[3].width(), 8);
        assert_eq!(pyr.levels[4].width(), 4);
        // next level would be 2x2 -- stop before it.
        assert_eq!(pyr.levels.len(), 5);
        for level in &pyr.levels {
            assert!(level.width() >= PYRAMID_MIN_DIM || level.width() == 64);
        }
    }

    #[test]
    fn laplacian_round_trip_within_tolerance() {
        let img = gradient_image(65, 37);
        let gauss = GaussianPyramid::build(&img, 4);
        let lap = LaplacianPyramid::build(&gauss);
        let reconstructed = lap.reconstruct();

        assert_eq!(reconstructed.width(), img.width());
        assert_eq!(reconstructed.height(), img.height());
        for y in 0..img.height() {
            for x in 0..img.width() {
                approx::assert_abs_diff_eq!(*img.at(x, y), *reconstructed.at(x, y), epsilon = 1e-4);
            }
        }
    }
}
