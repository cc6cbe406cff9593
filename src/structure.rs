//! Structure tensor field (spec §3 "Structure tensor", §4.9).

use std::f32::consts::{FRAC_PI_2, TAU};

use crate::buffer::{Buffer, Gray};
use crate::edge::{gradients, EdgeOperator};
use crate::filters::gaussian_blur_sigma;

/// Per-pixel raw structure tensor entries, before eigendecomposition.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StructureTensorSample {
    pub ixx: f32,
    pub ixy: f32,
    pub iyy: f32,
}

/// Derived eigenstructure of a [`StructureTensorSample`] (spec §3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StructureTensorEigen {
    pub lambda1: f32,
    pub lambda2: f32,
    pub theta: f32,
    pub anisotropy: f32,
}

impl StructureTensorSample {
    pub fn eigen(&self) -> StructureTensorEigen {
        let trace = self.ixx + self.iyy;
        let det = self.ixx * self.iyy - self.ixy * self.ixy;
        let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();
        let lambda1 = trace / 2.0 + disc;
        let lambda2 = trace / 2.0 - disc;

        let theta = if self.ixy.abs() > 1e-6 {
            0.5 * (2.0 * self.ixy).atan2(self.ixx - self.iyy)
        } else if self.ixx >= self.iyy {
            0.0
        } else {
            FRAC_PI_2
        };

        let sum = lambda1 + lambda2;
        let anisotropy = if sum > 1e-6 { (lambda1 - lambda2) / sum } else { 0.0 };

        StructureTensorEigen {
            lambda1,
            lambda2,
            theta,
            anisotropy,
        }
    }
}

pub type StructureTensorField = Buffer<StructureTensorSample>;

/// Build the structure tensor field from a luminance image: Sobel
/// gradients, then `Ixx=gx^2, Ixy=gx*gy, Iyy=gy^2` integrated with a
/// separable Gaussian of `sigma = integration_sigma` (spec §4.9).
pub fn structure_tensor_field(luminance: &Gray, integration_sigma: f32) -> StructureTensorField {
    let grad = gradients(luminance, EdgeOperator::Sobel);
    let (w, h) = (luminance.width(), luminance.height());

    let mut ixx = Gray::new(w, h);
    let mut ixy = Gray::new(w, h);
    let mut iyy = Gray::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let gx = *grad.gx.at(x, y);
            let gy = *grad.gy.at(x, y);
            *ixx.at_mut(x, y) = gx * gx;
            *ixy.at_mut(x, y) = gx * gy;
            *iyy.at_mut(x, y) = gy * gy;
        }
    }

    let ixx = gaussian_blur_sigma(&ixx, integration_sigma);
    let ixy = gaussian_blur_sigma(&ixy, integration_sigma);
    let iyy = gaussian_blur_sigma(&iyy, integration_sigma);

    let mut field = StructureTensorField::new(w, h);
    for y in 0..h {
        for x in 0..w {
            *field.at_mut(x, y) = StructureTensorSample {
                ixx: *ixx.at(x, y),
                ixy: *ixy.at(x, y),
                iyy: *iyy.at(x, y),
            };
        }
    }
    field
}

/// The unit eigenvector of `lambda1` (the dominant gradient direction),
/// used by the anisotropic kernel orientation (spec §4.9).
pub fn principal_direction(theta: f32) -> (f32, f32) {
    (theta.cos(), theta.sin())
}

/// Asserts theta stays within the documented `[0, TAU)` style range when
/// used for orientation math; kept as a tiny helper rather than a public
/// invariant since §3 does not constrain theta's sign.
#[allow(dead_code)]
fn wrap_angle(theta: f32) -> f32 {
    let mut t = theta % TAU;
    if t < 0.0 {
        t += TAU;
    }
    t
}
