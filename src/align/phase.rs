//! Windowed FFT phase correlation (spec §4.6). A near-direct port of the
//! teacher's `align/phase_correlation.rs` + `align/subpixel.rs`, adapted
//! from whole-frame translation to multi-window sampling with median
//! combine.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::buffer::Gray;
use crate::compute::{cpu_backend, ComputeBackend};
use crate::consts::PHASE_CORRELATION_MIN_CONFIDENCE;
use crate::error::{BurstSrError, Result};
use crate::motion::MotionVector;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseCorrelationConfig {
    /// Power-of-two sample window edge length.
    pub window_size: usize,
    pub num_samples: usize,
    pub sub_pixel_radius: usize,
    pub use_hanning: bool,
}

impl Default for PhaseCorrelationConfig {
    fn default() -> Self {
        Self {
            window_size: 256,
            num_samples: 4,
            sub_pixel_radius: 2,
            use_hanning: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseCorrelationResult {
    pub motion: MotionVector,
    pub confidence: f32,
    pub valid: bool,
}

/// Run phase correlation over `config.num_samples` windows spread across
/// the image and combine by per-axis median (spec §4.6).
pub fn align_phase_correlation(
    reference: &Gray,
    target: &Gray,
    config: &PhaseCorrelationConfig,
) -> Result<PhaseCorrelationResult> {
    if reference.width() != target.width() || reference.height() != target.height() {
        return Err(BurstSrError::InvalidInput {
            reason: "phase correlation requires equal-sized reference and target".to_string(),
        });
    }
    if !config.window_size.is_power_of_two() {
        return Err(BurstSrError::InvalidInput {
            reason: format!("phase correlation window_size {} is not a power of two", config.window_size),
        });
    }

    let backend = cpu_backend();
    let windows = sample_windows(reference.width(), reference.height(), config.window_size, config.num_samples);
    if windows.is_empty() {
        return Err(BurstSrError::InvalidInput {
            reason: "image too small for configured phase correlation window_size".to_string(),
        });
    }

    let mut shifts = Vec::with_capacity(windows.len());
    let mut confidences = Vec::with_capacity(windows.len());

    for (wx, wy) in windows {
        let ref_patch = extract_patch(reference, wx, wy, config.window_size);
        let tgt_patch = extract_patch(target, wx, wy, config.window_size);
        let (shift, confidence) = correlate_patch(&ref_patch, &tgt_patch, &backend, config.use_hanning);
        shifts.push(shift);
        confidences.push(confidence);
    }

    let dx = median(&shifts.iter().map(|s| s.0).collect::<Vec<_>>());
    let dy = median(&shifts.iter().map(|s| s.1).collect::<Vec<_>>());
    let confidence = median(&confidences);
    let valid = confidence > PHASE_CORRELATION_MIN_CONFIDENCE as f64;

    Ok(PhaseCorrelationResult {
        motion: MotionVector { dx: dx as f32, dy: dy as f32 },
        confidence: confidence as f32,
        valid,
    })
}

fn correlate_patch(
    reference: &Array2<f32>,
    target: &Array2<f32>,
    backend: &dyn ComputeBackend,
    use_hanning: bool,
) -> ((f64, f64), f64) {
    let (h, w) = reference.dim();

    let ref_windowed = if use_hanning { backend.hann_window(reference) } else { reference.clone() };
    let tgt_windowed = if use_hanning { backend.hann_window(target) } else { target.clone() };

    let ref_fft = backend.fft2d(&ref_windowed);
    let tgt_fft = backend.fft2d(&tgt_windowed);
    let cross_power = backend.cross_power_spectrum(&ref_fft, &tgt_fft);
    let correlation = backend.ifft2d_real(&cross_power);

    let (peak_row, peak_col, peak_val) = backend.find_peak(&correlation);

    let n = (h * w) as f64;
    let mean_abs: f64 = correlation.iter().map(|v| v.abs()).sum::<f64>() / n;
    let confidence = if mean_abs > 1e-15 { peak_val / mean_abs } else { 0.0 };

    let dy = if peak_row > h / 2 { peak_row as f64 - h as f64 } else { peak_row as f64 };
    let dx = if peak_col > w / 2 { peak_col as f64 - w as f64 } else { peak_col as f64 };

    let (sub_dy, sub_dx) = refine_peak_paraboloid(&correlation, peak_row, peak_col);

    ((dx + sub_dx, dy + sub_dy), confidence)
}

/// Parabolic sub-pixel refinement on the 3x3 neighborhood around the
/// integer peak, clamped to `+/-0.5` pixel (spec §4.6).
fn refine_peak_paraboloid(correlation: &Array2<f64>, peak_row: usize, peak_col: usize) -> (f64, f64) {
    let (h, w) = correlation.dim();
    if peak_row == 0 || peak_row >= h - 1 || peak_col == 0 || peak_col >= w - 1 {
        return (0.0, 0.0);
    }

    let y_prev = correlation[[peak_row - 1, peak_col]];
    let y_curr = correlation[[peak_row, peak_col]];
    let y_next = correlation[[peak_row + 1, peak_col]];
    let delta_row = if (y_prev - 2.0 * y_curr + y_next).abs() > 1e-12 {
        (y_prev - y_next) / (2.0 * (y_prev - 2.0 * y_curr + y_next))
    } else {
        0.0
    };

    let x_prev = correlation[[peak_row, peak_col - 1]];
    let x_curr = correlation[[peak_row, peak_col]];
    let x_next = correlation[[peak_row, peak_col + 1]];
    let delta_col = if (x_prev - 2.0 * x_curr + x_next).abs() > 1e-12 {
        (x_prev - x_next) / (2.0 * (x_prev - 2.0 * x_curr + x_next))
    } else {
        0.0
    };

    (delta_row.clamp(-0.5, 0.5), delta_col.clamp(-0.5, 0.5))
}

/// Pick up to `num_samples` window top-left corners spread across the
/// image (center plus corners, clamped to fit), skipping images smaller
/// than a single window.
fn sample_windows(width: usize, height: usize, window_size: usize, num_samples: usize) -> Vec<(usize, usize)> {
    if width < window_size || height < window_size {
        return Vec::new();
    }
    let max_x = width - window_size;
    let max_y = height - window_size;
    let candidates = [
        (max_x / 2, max_y / 2),
        (0, 0),
        (max_x, 0),
        (0, max_y),
        (max_x, max_y),
    ];
    candidates.into_iter().take(num_samples.max(1)).collect()
}

fn extract_patch(data: &Gray, x0: usize, y0: usize, size: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((size, size));
    for y in 0..size {
        for x in 0..size {
            out[[y, x]] = *data.at(x0 + x, y0 + y);
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_image(size: usize, seed: u32) -> Gray {
        let mut img = Gray::new(size, size);
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        for v in img.iter_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            *v = ((state >> 8) & 0xFFFF) as f32 / 65535.0;
        }
        img
    }

    fn shift_bilinear(src: &Gray, dx: f64, dy: f64) -> Gray {
        let (w, h) = (src.width(), src.height());
        let mut out = Gray::new(w, h);
        for y in 0..h {
            for x in 0..w {
                *out.at_mut(x, y) = crate::sampling::bilinear_sample_gray(src, x as f64 - dx, y as f64 - dy);
            }
        }
        out
    }

    #[test]
    fn recovers_known_subpixel_shift() {
        let reference = noise_image(256, 42);
        let target = shift_bilinear(&reference, 7.3, -4.1);

        let result = align_phase_correlation(&reference, &target, &PhaseCorrelationConfig::default()).unwrap();
        assert!((result.motion.dx - 7.3).abs() < 0.3, "dx={}", result.motion.dx);
        assert!((result.motion.dy - (-4.1)).abs() < 0.3, "dy={}", result.motion.dy);
    }

    #[test]
    fn zero_shift_has_high_confidence() {
        let reference = noise_image(256, 7);
        let result = align_phase_correlation(&reference, &reference, &PhaseCorrelationConfig::default()).unwrap();
        assert!(result.valid);
        assert!(result.motion.dx.abs() < 0.3);
        assert!(result.motion.dy.abs() < 0.3);
    }

    #[test]
    fn non_power_of_two_window_is_rejected() {
        let reference = noise_image(64, 1);
        let config = PhaseCorrelationConfig { window_size: 100, ..Default::default() };
        assert!(align_phase_correlation(&reference, &reference, &config).is_err());
    }
}
