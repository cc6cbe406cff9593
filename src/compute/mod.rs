//! Compute backend abstraction over `rustfft`/`rayon`. A GPU back-end is
//! explicitly out of this crate's scope (spec §9 "GPU parity"): it is an
//! external collaborator that must match these kernels within 1 ULP per
//! channel, not something this crate builds or stubs.

pub mod cpu;

use ndarray::Array2;
use num_complex::Complex;

pub use cpu::CpuBackend;

/// Phase-correlation and convolution primitives needed by the alignment
/// stages, factored behind a trait so an external GPU implementation can
/// stand in for [`CpuBackend`] without touching caller code.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn fft2d(&self, input: &Array2<f32>) -> Array2<Complex<f64>>;
    fn ifft2d_real(&self, input: &Array2<Complex<f64>>) -> Array2<f64>;
    fn cross_power_spectrum(
        &self,
        a: &Array2<Complex<f64>>,
        b: &Array2<Complex<f64>>,
    ) -> Array2<Complex<f64>>;
    fn hann_window(&self, input: &Array2<f32>) -> Array2<f32>;
    fn find_peak(&self, input: &Array2<f64>) -> (usize, usize, f64);
    fn shift_bilinear(&self, input: &Array2<f32>, dx: f64, dy: f64) -> Array2<f32>;
    fn convolve_separable(&self, input: &Array2<f32>, kernel: &[f32]) -> Array2<f32>;
}

/// Select the CPU backend; there is no runtime auto-detection in this crate.
pub fn cpu_backend() -> CpuBackend {
    CpuBackend
}
