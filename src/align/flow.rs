//! Hierarchical Lucas-Kanade dense optical flow (spec §4.5).

use serde::{Deserialize, Serialize};

use crate::buffer::Gray;
use crate::edge::{gradients, EdgeOperator, GradientField};
use crate::motion::{FlowField, FlowVector, Homography};
use crate::pyramid::{upsample_bilinear, GaussianPyramid};
use crate::sampling::bilinear_sample_gray;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub pyramid_levels: usize,
    /// Odd window edge length.
    pub window_size: usize,
    pub max_iterations: usize,
    pub convergence_threshold: f32,
    pub min_eigen_threshold: f32,
    pub use_gyro_init: bool,
    pub gyro_search_radius: usize,
    pub no_gyro_search_radius: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: 4,
            window_size: 15,
            max_iterations: 10,
            convergence_threshold: 0.01,
            min_eigen_threshold: 0.001,
            use_gyro_init: true,
            gyro_search_radius: 5,
            no_gyro_search_radius: 20,
        }
    }
}

/// Dense hierarchical Lucas-Kanade flow from `reference` to `target`.
/// `gyro_homography` optionally seeds level-0 flow (spec §4.5).
pub fn compute_flow(
    reference: &Gray,
    target: &Gray,
    config: &FlowConfig,
    gyro_homography: Option<&Homography>,
) -> FlowField {
    let ref_pyramid = GaussianPyramid::build(reference, config.pyramid_levels);
    let tgt_pyramid = GaussianPyramid::build(target, ref_pyramid.depth() - 1);

    let coarsest = ref_pyramid.depth() - 1;
    let mut flow = FlowField::new(ref_pyramid.levels[coarsest].width(), ref_pyramid.levels[coarsest].height());

    for level in (0..ref_pyramid.depth()).rev() {
        let ref_level = &ref_pyramid.levels[level];
        let tgt_level = &tgt_pyramid.levels[level];

        flow = if level == coarsest {
            FlowField::new(ref_level.width(), ref_level.height())
        } else {
            upsample_flow(&flow, ref_level.width(), ref_level.height())
        };

        if level == 0 {
            if let (true, Some(h)) = (config.use_gyro_init, gyro_homography) {
                seed_gyro(&mut flow, h);
            }
        }

        let gradient = gradients(ref_level, EdgeOperator::Scharr);
        lucas_kanade_level(ref_level, tgt_level, &gradient, &mut flow, config);
    }

    flow
}

/// Fraction of pixels with `confidence > 0` (spec §4.5).
pub fn coverage(flow: &FlowField) -> f32 {
    let total = flow.iter().count().max(1);
    let covered = flow.iter().filter(|v| v.confidence > 0.0).count();
    covered as f32 / total as f32
}

fn upsample_flow(flow: &FlowField, target_w: usize, target_h: usize) -> FlowField {
    let (sw, sh) = (flow.width(), flow.height());
    let mut out = FlowField::new(target_w, target_h);
    for y in 0..target_h {
        let sy = if sh > 0 { (y * sh) / target_h.max(1) } else { 0 };
        for x in 0..target_w {
            let sx = if sw > 0 { (x * sw) / target_w.max(1) } else { 0 };
            let src = flow.at(sx.min(sw.saturating_sub(1)), sy.min(sh.saturating_sub(1)));
            *out.at_mut(x, y) = FlowVector {
                dx: src.dx * 2.0,
                dy: src.dy * 2.0,
                confidence: src.confidence,
            };
        }
    }
    out
}

fn seed_gyro(flow: &mut FlowField, h: &Homography) {
    let (w, hgt) = (flow.width(), flow.height());
    for y in 0..hgt {
        for x in 0..w {
            let (xp, yp) = h.transform(x as f32, y as f32);
            let v = flow.at_mut(x, y);
            v.dx = xp - x as f32;
            v.dy = yp - y as f32;
        }
    }
}

fn lucas_kanade_level(reference: &Gray, target: &Gray, gradient: &GradientField, flow: &mut FlowField, config: &FlowConfig) {
    let (w, h) = (reference.width(), reference.height());
    let half = (config.window_size / 2) as i32;

    for y in 0..h {
        for x in 0..w {
            let mut dx = flow.at(x, y).dx;
            let mut dy = flow.at(x, y).dy;
            let mut confidence = 0.0f32;

            for _iter in 0..config.max_iterations {
                let mut ixx = 0.0f32;
                let mut ixy = 0.0f32;
                let mut iyy = 0.0f32;
                let mut bx = 0.0f32;
                let mut by = 0.0f32;

                for wy in -half..=half {
                    for wx in -half..=half {
                        let rx = (x as i32 + wx).clamp(0, w as i32 - 1) as usize;
                        let ry = (y as i32 + wy).clamp(0, h as i32 - 1) as usize;

                        let gx = *gradient.gx.at(rx, ry);
                        let gy = *gradient.gy.at(rx, ry);

                        let tx = rx as f64 + dx as f64;
                        let ty = ry as f64 + dy as f64;
                        let it = bilinear_sample_gray(target, tx, ty) - reference.at(rx, ry);

                        ixx += gx * gx;
                        ixy += gx * gy;
                        iyy += gy * gy;
                        bx += gx * it;
                        by += gy * it;
                    }
                }

                let det = ixx * iyy - ixy * ixy;
                let trace = ixx + iyy;
                let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();
                let min_eigen = trace / 2.0 - disc;

                if min_eigen < config.min_eigen_threshold {
                    confidence = 0.0;
                    break;
                }
                confidence = 1.0;

                if det.abs() < 1e-9 {
                    break;
                }
                let delta_dx = (iyy * bx - ixy * by) / det;
                let delta_dy = (ixx * by - ixy * bx) / det;

                dx += delta_dx;
                dy += delta_dy;

                if (delta_dx * delta_dx + delta_dy * delta_dy).sqrt() < config.convergence_threshold {
                    break;
                }
            }

            *flow.at_mut(x, y) = FlowVector { dx, dy, confidence };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(size: usize) -> Gray {
        let mut img = Gray::new(size, size);
        for y in 0..size {
            for x in 0..size {
                *img.at_mut(x, y) = ((x + y) as f32 / (2 * (size - 1)).max(1) as f32).min(1.0);
            }
        }
        img
    }

    fn shift_image(src: &Gray, dx: f64, dy: f64) -> Gray {
        let (w, h) = (src.width(), src.height());
        let mut out = Gray::new(w, h);
        for y in 0..h {
            for x in 0..w {
                *out.at_mut(x, y) = bilinear_sample_gray(src, x as f64 - dx, y as f64 - dy);
            }
        }
        out
    }

    #[test]
    fn small_uniform_shift_is_approximately_recovered() {
        let reference = gradient_image(48);
        let target = shift_image(&reference, 1.0, 0.0);
        let config = FlowConfig { pyramid_levels: 2, use_gyro_init: false, ..Default::default() };

        let flow = compute_flow(&reference, &target, &config, None);
        let center = flow.at(24, 24);
        assert!(center.confidence > 0.0);
        assert!((center.dx - 1.0).abs() < 0.5, "dx={}", center.dx);
    }

    #[test]
    fn coverage_is_one_when_all_pixels_converge() {
        let reference = gradient_image(32);
        let config = FlowConfig { pyramid_levels: 1, use_gyro_init: false, ..Default::default() };
        let flow = compute_flow(&reference, &reference, &config, None);
        assert!(coverage(&flow) > 0.5);
    }

    #[test]
    fn gyro_seed_initializes_level_zero_flow() {
        let mut h = Homography::identity();
        h.m[0][2] = 2.0;
        let reference = gradient_image(16);
        let config = FlowConfig { pyramid_levels: 0, use_gyro_init: true, max_iterations: 0, ..Default::default() };
        let flow = compute_flow(&reference, &reference, &config, Some(&h));
        assert!((flow.at(0, 0).dx - 2.0).abs() < 1e-3);
    }
}
