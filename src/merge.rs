//! Robust per-pixel frame merging and Wiener post-filter (spec §4.8).
//! Grounded on the teacher's `stack/median.rs`, `stack/sigma_clip.rs`, and
//! `stack/mean.rs`: row-parallel above the shared pixel-count threshold,
//! per-channel independence, `select_nth_unstable` for the median.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::{Rgb, RgbImage};
use crate::consts::{EPSILON, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{BurstSrError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::enum_variant_names)]
pub enum MergeMethod {
    Average,
    TrimmedMean,
    MEstimator,
    Median,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub method: MergeMethod,
    pub trim_ratio: f32,
    pub huber_delta: f32,
    pub apply_wiener: bool,
    pub wiener_noise_var: f32,
    pub wiener_window_size: usize,
    /// Weight samples by per-frame `alignment.confidence` (spec §4.8).
    pub weighted: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            method: MergeMethod::TrimmedMean,
            trim_ratio: 0.25,
            huber_delta: 1.0,
            apply_wiener: true,
            wiener_noise_var: 0.001,
            wiener_window_size: 5,
            weighted: false,
        }
    }
}

/// Merge `frames` (already aligned to a common grid) per the configured
/// method, optionally weighted by `confidences` (one per frame), then
/// apply the Wiener post-filter when enabled.
pub fn merge_frames(frames: &[RgbImage], confidences: Option<&[f32]>, config: &MergeConfig) -> Result<RgbImage> {
    if frames.is_empty() {
        return Err(BurstSrError::InvalidInput { reason: "merge requires at least one frame".to_string() });
    }
    let (w, h) = (frames[0].width(), frames[0].height());
    for f in frames {
        if f.width() != w || f.height() != h {
            return Err(BurstSrError::InvalidInput { reason: "all merge input frames must share dimensions".to_string() });
        }
    }
    if let Some(c) = confidences {
        if c.len() != frames.len() {
            return Err(BurstSrError::InvalidInput { reason: "confidences length must match frame count".to_string() });
        }
    }

    let weights: Vec<f32> = match confidences {
        Some(c) if config.weighted => c.to_vec(),
        _ => vec![1.0; frames.len()],
    };

    let merged = if w * h >= PARALLEL_PIXEL_THRESHOLD && frames.len() > 1 {
        merge_parallel(frames, &weights, config)
    } else {
        merge_sequential(frames, &weights, config)
    };

    let mut out = merged;
    if config.apply_wiener {
        out = wiener_filter(&out, config.wiener_noise_var, config.wiener_window_size);
    }
    Ok(out)
}

fn merge_sequential(frames: &[RgbImage], weights: &[f32], config: &MergeConfig) -> RgbImage {
    let (w, h) = (frames[0].width(), frames[0].height());
    let mut out = RgbImage::new(w, h);
    let n = frames.len();
    let mut r = vec![0.0f32; n];
    let mut g = vec![0.0f32; n];
    let mut b = vec![0.0f32; n];

    for y in 0..h {
        for x in 0..w {
            for (i, frame) in frames.iter().enumerate() {
                let px = frame.at(x, y);
                r[i] = px.r;
                g[i] = px.g;
                b[i] = px.b;
            }
            *out.at_mut(x, y) = Rgb::new(
                merge_channel(&mut r, weights, config),
                merge_channel(&mut g, weights, config),
                merge_channel(&mut b, weights, config),
            );
        }
    }
    out
}

fn merge_parallel(frames: &[RgbImage], weights: &[f32], config: &MergeConfig) -> RgbImage {
    let (w, h) = (frames[0].width(), frames[0].height());
    let n = frames.len();

    let rows: Vec<Vec<Rgb>> = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut r = vec![0.0f32; n];
            let mut g = vec![0.0f32; n];
            let mut b = vec![0.0f32; n];
            let mut row = Vec::with_capacity(w);
            for x in 0..w {
                for (i, frame) in frames.iter().enumerate() {
                    let px = frame.at(x, y);
                    r[i] = px.r;
                    g[i] = px.g;
                    b[i] = px.b;
                }
                row.push(Rgb::new(
                    merge_channel(&mut r, weights, config),
                    merge_channel(&mut g, weights, config),
                    merge_channel(&mut b, weights, config),
                ));
            }
            row
        })
        .collect();

    let mut out = RgbImage::new(w, h);
    for (y, row) in rows.into_iter().enumerate() {
        for (x, px) in row.into_iter().enumerate() {
            *out.at_mut(x, y) = px;
        }
    }
    out
}

/// `values` is scratch space, clobbered on return (mirrors the teacher's
/// reused-buffer pattern in `sigma_clip_pixel`).
fn merge_channel(values: &mut [f32], weights: &[f32], config: &MergeConfig) -> f32 {
    match config.method {
        MergeMethod::Average => weighted_average(values, weights),
        MergeMethod::TrimmedMean => trimmed_mean(values, config.trim_ratio),
        MergeMethod::Median => median(values),
        MergeMethod::MEstimator => huber_estimate(values, config.huber_delta),
    }
}

fn weighted_average(values: &[f32], weights: &[f32]) -> f32 {
    let sum_w: f32 = weights.iter().sum();
    if sum_w < EPSILON {
        return values.iter().sum::<f32>() / values.len().max(1) as f32;
    }
    values.iter().zip(weights).map(|(v, w)| v * w).sum::<f32>() / sum_w
}

/// Sort, drop `floor(trim*N)` lowest and highest, average the remainder
/// (spec §4.8, at least one sample retained).
fn trimmed_mean(values: &mut [f32], trim_ratio: f32) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    let drop = ((trim_ratio * n as f32).floor() as usize).min((n - 1) / 2);
    let kept = &values[drop..n - drop];
    kept.iter().sum::<f32>() / kept.len().max(1) as f32
}

/// Median via `select_nth_unstable`, averaging the two middle values when
/// `N` is even (spec §4.8), mirroring the teacher's `median_stack`.
fn median(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 1 {
        return values[0];
    }
    if n % 2 == 1 {
        let mid = n / 2;
        *values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap()).1
    } else {
        let mid = n / 2;
        let (lower_half, upper_val, _) = values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
        let upper = *upper_val;
        let lower = lower_half.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lower + upper) / 2.0
    }
}

/// Huber location estimator initialized at the median (spec §4.8): up to
/// 10 iterations or `Δ<1e-4`.
fn huber_estimate(values: &mut [f32], delta: f32) -> f32 {
    let mut estimate = median(values);
    for _ in 0..10 {
        let mut sum_w = 0.0f32;
        let mut sum_wx = 0.0f32;
        for &v in values.iter() {
            let residual = (v - estimate).abs();
            let w = if residual <= delta { 1.0 } else { delta / residual.max(EPSILON) };
            sum_w += w;
            sum_wx += w * v;
        }
        if sum_w < EPSILON {
            break;
        }
        let next = sum_wx / sum_w;
        let converged = (next - estimate).abs() < 1e-4;
        estimate = next;
        if converged {
            break;
        }
    }
    estimate
}

/// Local-window Wiener filter, applied independently per channel
/// (spec §4.8): `out = mu + max(0, sigma^2 - n^2)/max(sigma^2, n^2) * (x - mu)`.
fn wiener_filter(image: &RgbImage, noise_var: f32, window_size: usize) -> RgbImage {
    let (w, h) = (image.width(), image.height());
    let half = (window_size / 2) as i32;
    let mut out = RgbImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut sum = Rgb::BLACK;
            let mut sum_sq = [0.0f32; 3];
            let mut count = 0.0f32;
            for wy in -half..=half {
                for wx in -half..=half {
                    let sx = (x as i32 + wx).clamp(0, w as i32 - 1) as usize;
                    let sy = (y as i32 + wy).clamp(0, h as i32 - 1) as usize;
                    let px = image.at(sx, sy);
                    sum = sum + *px;
                    sum_sq[0] += px.r * px.r;
                    sum_sq[1] += px.g * px.g;
                    sum_sq[2] += px.b * px.b;
                    count += 1.0;
                }
            }
            let mean = sum * (1.0 / count);
            let center = *image.at(x, y);
            let channel = |mean_c: f32, sum_sq_c: f32, x_c: f32| -> f32 {
                let variance = (sum_sq_c / count - mean_c * mean_c).max(0.0);
                let gain = (variance - noise_var).max(0.0) / variance.max(noise_var).max(EPSILON);
                mean_c + gain * (x_c - mean_c)
            };
            *out.at_mut(x, y) = Rgb::new(
                channel(mean.r, sum_sq[0], center.r),
                channel(mean.g, sum_sq[1], center.g),
                channel(mean.b, sum_sq[2], center.b),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(size: usize) -> RgbImage {
        let mut img = RgbImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let v = x as f32 / (size - 1) as f32;
                *img.at_mut(x, y) = Rgb::new(v, v, v);
            }
        }
        img
    }

    #[test]
    fn static_burst_trimmed_mean_reproduces_input() {
        let frame = gradient_frame(64);
        let frames: Vec<RgbImage> = (0..5).map(|_| frame.clone()).collect();
        let config = MergeConfig { apply_wiener: false, ..Default::default() };
        let merged = merge_frames(&frames, None, &config).unwrap();
        for y in 0..64 {
            for x in 0..64 {
                assert!((merged.at(x, y).r - frame.at(x, y).r).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn single_frame_merge_is_idempotent_for_all_methods() {
        let frame = gradient_frame(16);
        for method in [MergeMethod::Average, MergeMethod::TrimmedMean, MergeMethod::Median, MergeMethod::MEstimator] {
            let config = MergeConfig { method, apply_wiener: false, ..Default::default() };
            let merged = merge_frames(std::slice::from_ref(&frame), None, &config).unwrap();
            for y in 0..16 {
                for x in 0..16 {
                    assert!((merged.at(x, y).r - frame.at(x, y).r).abs() < 1e-6, "method={method:?}");
                }
            }
        }
    }

    #[test]
    fn median_rejects_a_single_outlier_frame() {
        let base = gradient_frame(8);
        let mut outlier = base.clone();
        for y in 0..8 {
            for x in 0..8 {
                *outlier.at_mut(x, y) = Rgb::new(1.0, 1.0, 1.0);
            }
        }
        let frames = vec![base.clone(), base.clone(), base.clone(), outlier];
        let config = MergeConfig { method: MergeMethod::Median, apply_wiener: false, ..Default::default() };
        let merged = merge_frames(&frames, None, &config).unwrap();
        assert!((merged.at(4, 4).r - base.at(4, 4).r).abs() < 1e-5);
    }

    #[test]
    fn empty_frame_list_is_rejected() {
        let config = MergeConfig::default();
        assert!(merge_frames(&[], None, &config).is_err());
    }
}
