//! FAST-9 keypoints, rotated BRIEF-style descriptors, and RANSAC
//! homography fitting (spec §4.7). No direct teacher analogue; built in
//! the teacher's idiom (explicit `Result`, row-major math, no panics
//! outside tests) and enriched with `rand`/`rand_chacha` for deterministic
//! sampling, per DESIGN.md.

use rand::seq::index::sample;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::buffer::Gray;
use crate::consts::{ORB_MIN_INLIER_COUNT, ORB_MIN_INLIER_RATIO};
use crate::motion::Homography;
use crate::sampling::bilinear_sample_gray;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    pub max_keypoints: usize,
    pub n_levels: usize,
    pub scale_factor: f32,
    pub fast_threshold: f32,
    pub patch_size: usize,
    pub match_ratio_threshold: f32,
    pub ransac_iterations: usize,
    pub ransac_threshold: f32,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            max_keypoints: 500,
            n_levels: 4,
            scale_factor: 1.2,
            fast_threshold: 20.0 / 255.0,
            patch_size: 31,
            match_ratio_threshold: 0.75,
            ransac_iterations: 500,
            ransac_threshold: 3.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbKeypoint {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: usize,
}

/// 256-bit BRIEF-style descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrbDescriptor(pub [u64; 4]);

impl OrbDescriptor {
    pub fn hamming_distance(&self, other: &OrbDescriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrbAlignmentResult {
    pub homography: Homography,
    pub inlier_count: usize,
    pub match_count: usize,
    pub success: bool,
}

const BRESENHAM_CIRCLE: [(i32, i32); 16] = [
    (0, -3), (1, -3), (2, -2), (3, -1), (3, 0), (3, 1), (2, 2), (1, 3),
    (0, 3), (-1, 3), (-2, 2), (-3, 1), (-3, 0), (-3, -1), (-2, -2), (-1, -3),
];

/// FAST-9: a pixel is a corner if 9 contiguous circle samples are all
/// brighter or all darker than `center +/- threshold`. Response is the
/// summed absolute deviation over the winning run.
fn fast9_response(data: &Gray, x: i32, y: i32, threshold: f32) -> Option<f32> {
    let (w, h) = (data.width() as i32, data.height() as i32);
    if x < 3 || y < 3 || x >= w - 3 || y >= h - 3 {
        return None;
    }
    let center = *data.at(x as usize, y as usize);
    let samples: Vec<f32> = BRESENHAM_CIRCLE
        .iter()
        .map(|&(dx, dy)| *data.at((x + dx) as usize, (y + dy) as usize))
        .collect();

    let brighter: Vec<bool> = samples.iter().map(|&s| s > center + threshold).collect();
    let darker: Vec<bool> = samples.iter().map(|&s| s < center - threshold).collect();

    let longest_run = |flags: &[bool]| -> (usize, f32) {
        let n = flags.len();
        let mut best_len = 0usize;
        let mut best_score = 0.0f32;
        for start in 0..n {
            if !flags[start] {
                continue;
            }
            let mut len = 0usize;
            let mut score = 0.0f32;
            for k in 0..n {
                let idx = (start + k) % n;
                if flags[idx] {
                    len += 1;
                    score += (samples[idx] - center).abs();
                } else {
                    break;
                }
            }
            if len > best_len {
                best_len = len;
                best_score = score;
            }
        }
        (best_len, best_score)
    };

    let (bright_len, bright_score) = longest_run(&brighter);
    let (dark_len, dark_score) = longest_run(&darker);

    if bright_len >= 9 || dark_len >= 9 {
        Some(bright_score.max(dark_score))
    } else {
        None
    }
}

fn resize_bilinear(src: &Gray, target_w: usize, target_h: usize) -> Gray {
    let mut out = Gray::new(target_w.max(1), target_h.max(1));
    let (sw, sh) = (src.width(), src.height());
    for y in 0..out.height() {
        let sy = if out.height() > 1 { y as f64 * (sh - 1).max(1) as f64 / (out.height() - 1).max(1) as f64 } else { 0.0 };
        for x in 0..out.width() {
            let sx = if out.width() > 1 { x as f64 * (sw - 1).max(1) as f64 / (out.width() - 1).max(1) as f64 } else { 0.0 };
            *out.at_mut(x, y) = bilinear_sample_gray(src, sx, sy);
        }
    }
    out
}

/// Detect FAST-9 corners across a `scale_factor^i` pyramid, grid-NMS per
/// level, orientation by intensity centroid, keypoints returned in
/// level-0 coordinates (spec §4.7).
pub fn detect_keypoints(image: &Gray, config: &OrbConfig) -> (Vec<OrbKeypoint>, Vec<OrbDescriptor>) {
    let mut all_keypoints: Vec<OrbKeypoint> = Vec::new();
    let mut level_images: Vec<Gray> = Vec::with_capacity(config.n_levels);

    let mut w = image.width() as f32;
    let mut h = image.height() as f32;
    for level in 0..config.n_levels {
        let level_img = if level == 0 {
            image.clone()
        } else {
            resize_bilinear(image, w.round().max(1.0) as usize, h.round().max(1.0) as usize)
        };
        if level_img.width() < 7 || level_img.height() < 7 {
            break;
        }

        let scale = config.scale_factor.powi(level as i32);
        let cell = config.patch_size.max(1);
        let mut cells: std::collections::HashMap<(usize, usize), OrbKeypoint> = std::collections::HashMap::new();

        for y in 0..level_img.height() as i32 {
            for x in 0..level_img.width() as i32 {
                if let Some(response) = fast9_response(&level_img, x, y, config.fast_threshold) {
                    let cell_key = (x as usize / cell, y as usize / cell);
                    let candidate = OrbKeypoint {
                        x: x as f32 * scale,
                        y: y as f32 * scale,
                        angle: intensity_centroid_angle(&level_img, x, y, (config.patch_size / 2) as i32),
                        response,
                        octave: level,
                    };
                    cells
                        .entry(cell_key)
                        .and_modify(|existing| {
                            if candidate.response > existing.response {
                                *existing = candidate;
                            }
                        })
                        .or_insert(candidate);
                }
            }
        }

        all_keypoints.extend(cells.into_values());
        level_images.push(level_img);
        w /= config.scale_factor;
        h /= config.scale_factor;
    }

    all_keypoints.sort_by(|a, b| b.response.partial_cmp(&a.response).unwrap());
    all_keypoints.truncate(config.max_keypoints);

    let pattern = brief_pattern();
    let descriptors: Vec<OrbDescriptor> = all_keypoints
        .iter()
        .map(|kp| {
            let level_img = &level_images[kp.octave];
            let scale = config.scale_factor.powi(kp.octave as i32);
            compute_descriptor(level_img, kp.x / scale, kp.y / scale, kp.angle, &pattern)
        })
        .collect();

    (all_keypoints, descriptors)
}

fn intensity_centroid_angle(data: &Gray, x: i32, y: i32, radius: i32) -> f32 {
    let (w, h) = (data.width() as i32, data.height() as i32);
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let sx = (x + dx).clamp(0, w - 1);
            let sy = (y + dy).clamp(0, h - 1);
            let intensity = *data.at(sx as usize, sy as usize);
            m10 += dx as f32 * intensity;
            m01 += dy as f32 * intensity;
        }
    }
    m01.atan2(m10)
}

/// Deterministic fixed 256-entry sampling pattern `(x1,y1,x2,y2)`, seeded
/// once so every descriptor computation is reproducible.
fn brief_pattern() -> Vec<(i8, i8, i8, i8)> {
    let mut rng = ChaCha8Rng::seed_from_u64(0xB21E_0000_0BC1);
    (0..256)
        .map(|_| {
            let gen = |rng: &mut ChaCha8Rng| rng.random_range(-15i32..=15i32) as i8;
            (gen(&mut rng), gen(&mut rng), gen(&mut rng), gen(&mut rng))
        })
        .collect()
}

fn compute_descriptor(data: &Gray, x: f32, y: f32, angle: f32, pattern: &[(i8, i8, i8, i8)]) -> OrbDescriptor {
    let (cos_a, sin_a) = (angle.cos(), angle.sin());
    let (w, h) = (data.width() as i32, data.height() as i32);
    let sample_at = |dx: i8, dy: i8| -> f32 {
        let rx = dx as f32 * cos_a - dy as f32 * sin_a;
        let ry = dx as f32 * sin_a + dy as f32 * cos_a;
        let sx = (x + rx).round() as i32;
        let sy = (y + ry).round() as i32;
        *data.at(sx.clamp(0, w - 1) as usize, sy.clamp(0, h - 1) as usize)
    };

    let mut bits = [0u64; 4];
    for (i, &(x1, y1, x2, y2)) in pattern.iter().enumerate() {
        let bit = sample_at(x1, y1) < sample_at(x2, y2);
        if bit {
            bits[i / 64] |= 1u64 << (i % 64);
        }
    }
    OrbDescriptor(bits)
}

/// Brute-force Hamming matching with Lowe's ratio test (spec §4.7).
pub fn match_descriptors(query: &[OrbDescriptor], train: &[OrbDescriptor], ratio_threshold: f32) -> Vec<FeatureMatch> {
    let mut matches = Vec::new();
    for (qi, q) in query.iter().enumerate() {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (ti, t) in train.iter().enumerate() {
            let d = q.hamming_distance(t);
            if d < best.0 {
                second = best.0;
                best = (d, ti);
            } else if d < second {
                second = d;
            }
        }
        if best.1 != usize::MAX && (best.0 as f32) < ratio_threshold * second.max(1) as f32 {
            matches.push(FeatureMatch { query_idx: qi, train_idx: best.1, distance: best.0 });
        }
    }
    matches
}

/// Solve a homography (normalized `H22=1`) from correspondences by
/// least squares (DLT system via normal equations + Gaussian
/// elimination); works for exactly 4 (minimal) or more (refit) points.
fn solve_homography_dlt(correspondences: &[(f32, f32, f32, f32)]) -> Option<Homography> {
    if correspondences.len() < 4 {
        return None;
    }

    let mut ata = [[0.0f64; 8]; 8];
    let mut atb = [0.0f64; 8];

    for &(x, y, xp, yp) in correspondences {
        let (x, y, xp, yp) = (x as f64, y as f64, xp as f64, yp as f64);
        let row1 = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
        let b1 = xp;
        let row2 = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
        let b2 = yp;

        for i in 0..8 {
            atb[i] += row1[i] * b1 + row2[i] * b2;
            for j in 0..8 {
                ata[i][j] += row1[i] * row1[j] + row2[i] * row2[j];
            }
        }
    }

    let h = gaussian_solve(ata, atb)?;
    Some(Homography {
        m: [
            [h[0] as f32, h[1] as f32, h[2] as f32],
            [h[3] as f32, h[4] as f32, h[5] as f32],
            [h[6] as f32, h[7] as f32, 1.0],
        ],
    })
}

fn gaussian_solve(mut a: [[f64; 8]; 8], mut b: [f64; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let mut pivot_row = col;
        let mut pivot_val = a[col][col].abs();
        for row in (col + 1)..8 {
            if a[row][col].abs() > pivot_val {
                pivot_val = a[row][col].abs();
                pivot_row = row;
            }
        }
        if pivot_val < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = a[col][col];
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..8 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut h = [0.0f64; 8];
    for i in 0..8 {
        h[i] = b[i] / a[i][i];
    }
    Some(h)
}

fn reprojection_error(h: &Homography, x: f32, y: f32, xp: f32, yp: f32) -> f32 {
    let (ex, ey) = h.transform(x, y);
    ((ex - xp).powi(2) + (ey - yp).powi(2)).sqrt()
}

/// RANSAC homography fit: repeatedly sample 4 correspondences, count
/// inliers, keep the best model, then refit on all its inliers
/// (spec §4.7). `seed` makes the sampling deterministic.
pub fn ransac_homography(
    matches: &[(OrbKeypoint, OrbKeypoint)],
    iterations: usize,
    threshold: f32,
    seed: u64,
) -> Option<(Homography, Vec<usize>)> {
    if matches.len() < 4 {
        return None;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_h = Homography::identity();

    for _ in 0..iterations {
        let sampled = sample(&mut rng, matches.len(), 4);
        let correspondences: Vec<(f32, f32, f32, f32)> = sampled
            .iter()
            .map(|i| {
                let (a, b) = &matches[i];
                (a.x, a.y, b.x, b.y)
            })
            .collect();

        let Some(h) = solve_homography_dlt(&correspondences) else { continue };

        let inliers: Vec<usize> = matches
            .iter()
            .enumerate()
            .filter(|(_, (a, b))| reprojection_error(&h, a.x, a.y, b.x, b.y) <= threshold)
            .map(|(i, _)| i)
            .collect();

        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            best_h = h;
        }
    }

    if best_inliers.is_empty() {
        return None;
    }

    let refit_corr: Vec<(f32, f32, f32, f32)> = best_inliers
        .iter()
        .map(|&i| {
            let (a, b) = &matches[i];
            (a.x, a.y, b.x, b.y)
        })
        .collect();
    let refit_h = solve_homography_dlt(&refit_corr).unwrap_or(best_h);

    Some((refit_h, best_inliers))
}

/// Full pipeline: detect, match, RANSAC, and apply the success criterion
/// `inlier_ratio >= 0.25 && inlier_count >= 15` (spec §4.7).
pub fn align_orb(reference: &Gray, target: &Gray, config: &OrbConfig, seed: u64) -> OrbAlignmentResult {
    let (ref_kp, ref_desc) = detect_keypoints(reference, config);
    let (tgt_kp, tgt_desc) = detect_keypoints(target, config);

    let raw_matches = match_descriptors(&ref_desc, &tgt_desc, config.match_ratio_threshold);
    let pairs: Vec<(OrbKeypoint, OrbKeypoint)> = raw_matches
        .iter()
        .map(|m| (ref_kp[m.query_idx], tgt_kp[m.train_idx]))
        .collect();

    let match_count = pairs.len();
    let Some((homography, inliers)) = ransac_homography(&pairs, config.ransac_iterations, config.ransac_threshold, seed)
    else {
        return OrbAlignmentResult {
            homography: Homography::identity(),
            inlier_count: 0,
            match_count,
            success: false,
        };
    };

    let inlier_count = inliers.len();
    let inlier_ratio = inlier_count as f64 / match_count.max(1) as f64;
    let success = inlier_ratio >= ORB_MIN_INLIER_RATIO && inlier_count >= ORB_MIN_INLIER_COUNT;

    OrbAlignmentResult { homography, inlier_count, match_count, success }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_image(size: usize) -> Gray {
        let mut img = Gray::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let v = (((x * 7 + y * 13) % 23) as f32) / 23.0;
                let checker = if (x / 4 + y / 4) % 2 == 0 { 0.3 } else { 0.0 };
                *img.at_mut(x, y) = (v + checker).min(1.0);
            }
        }
        img
    }

    #[test]
    fn identical_image_yields_near_identity_homography_with_high_inlier_ratio() {
        let img = textured_image(96);
        let config = OrbConfig { max_keypoints: 300, ..Default::default() };
        let result = align_orb(&img, &img, &config, 7);

        assert!(result.success, "match_count={} inlier_count={}", result.match_count, result.inlier_count);
        let identity = Homography::identity();
        for row in 0..3 {
            for col in 0..3 {
                assert!((result.homography.m[row][col] - identity.m[row][col]).abs() < 5e-2);
            }
        }
        assert!(result.inlier_count as f32 / result.match_count.max(1) as f32 >= 0.95);
    }

    #[test]
    fn hamming_distance_of_identical_descriptors_is_zero() {
        let img = textured_image(64);
        let pattern = brief_pattern();
        let d1 = compute_descriptor(&img, 32.0, 32.0, 0.0, &pattern);
        let d2 = compute_descriptor(&img, 32.0, 32.0, 0.0, &pattern);
        assert_eq!(d1.hamming_distance(&d2), 0);
    }

    #[test]
    fn too_few_matches_fails_ransac() {
        let matches = vec![
            (OrbKeypoint { x: 0.0, y: 0.0, angle: 0.0, response: 1.0, octave: 0 }, OrbKeypoint { x: 0.0, y: 0.0, angle: 0.0, response: 1.0, octave: 0 }),
        ];
        assert!(ransac_homography(&matches, 10, 3.0, 1).is_none());
    }
}
