//! YUV 4:2:0 -> RGB -> luminance conversion (spec §4.1).

use crate::buffer::{Gray, Rgb, RgbImage};

/// Planar or semi-planar YUV 4:2:0 frame handed in by the capture
/// collaborator (spec §6). `uv_pixel_stride` is 1 for fully planar U/V
/// planes, 2 for interleaved (semi-planar) chroma.
pub struct YuvFrame<'a> {
    pub y_plane: &'a [u8],
    pub u_plane: &'a [u8],
    pub v_plane: &'a [u8],
    pub y_row_stride: usize,
    pub uv_row_stride: usize,
    pub uv_pixel_stride: usize,
    pub width: usize,
    pub height: usize,
}

impl<'a> YuvFrame<'a> {
    fn chroma_width(&self) -> usize {
        (self.width + 1) / 2
    }

    fn chroma_height(&self) -> usize {
        (self.height + 1) / 2
    }

    fn sample_y(&self, x: usize, y: usize) -> f32 {
        self.y_plane[y * self.y_row_stride + x] as f32 / 255.0
    }

    /// Bilinear-reconstruct chroma at the full-resolution pixel `(x,y)`
    /// from the half-resolution U/V planes, clamping to the plane edges.
    fn sample_chroma(&self, plane: &[u8], x: usize, y: usize) -> f32 {
        let cw = self.chroma_width();
        let ch = self.chroma_height();
        // Each chroma sample covers a 2x2 block; co-site it at the block
        // center so full-res pixel (0,0) and (1,1) both interpolate toward
        // chroma sample (0,0).
        let cx = (x as f64 - 0.5) / 2.0;
        let cy = (y as f64 - 0.5) / 2.0;

        let x0 = cx.floor();
        let y0 = cy.floor();
        let fx = (cx - x0) as f32;
        let fy = (cy - y0) as f32;

        let clamp_idx = |v: f64, max: usize| -> usize { v.clamp(0.0, (max - 1) as f64) as usize };

        let sample = |ix: f64, iy: f64| -> f32 {
            let px = clamp_idx(ix, cw);
            let py = clamp_idx(iy, ch);
            plane[py * self.uv_row_stride + px * self.uv_pixel_stride] as f32 / 255.0 - 0.5
        };

        let v00 = sample(x0, y0);
        let v10 = sample(x0 + 1.0, y0);
        let v01 = sample(x0, y0 + 1.0);
        let v11 = sample(x0 + 1.0, y0 + 1.0);

        v00 * (1.0 - fx) * (1.0 - fy)
            + v10 * fx * (1.0 - fy)
            + v01 * (1.0 - fx) * fy
            + v11 * fx * fy
    }

    /// Convert to an RGB float buffer using Rec. 601 coefficients.
    /// Output is clamped to `[0,1]`.
    pub fn to_rgb(&self) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let yv = self.sample_y(x, y);
                let u = self.sample_chroma(self.u_plane, x, y);
                let v = self.sample_chroma(self.v_plane, x, y);

                let r = yv + 1.402 * v;
                let g = yv - 0.344136 * u - 0.714136 * v;
                let b = yv + 1.772 * u;

                *out.at_mut(x, y) = Rgb::new(r, g, b).sanitized();
            }
        }
        out
    }
}

/// Rec. 601 luminance: `Y = 0.299R + 0.587G + 0.114B` (spec §4.1).
pub fn luminance(rgb: &RgbImage) -> Gray {
    let mut out = Gray::new(rgb.width(), rgb.height());
    for y in 0..rgb.height() {
        for x in 0..rgb.width() {
            let px = rgb.at(x, y);
            *out.at_mut(x, y) = (0.299 * px.r + 0.587 * px.g + 0.114 * px.b).clamp(0.0, 1.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_gray_yuv_round_trips_to_neutral_rgb() {
        // Y=128, U=V=128 everywhere should produce mid-gray RGB.
        let w = 4;
        let h = 4;
        let y_plane = vec![128u8; w * h];
        let u_plane = vec![128u8; (w / 2) * (h / 2)];
        let v_plane = vec![128u8; (w / 2) * (h / 2)];

        let frame = YuvFrame {
            y_plane: &y_plane,
            u_plane: &u_plane,
            v_plane: &v_plane,
            y_row_stride: w,
            uv_row_stride: w / 2,
            uv_pixel_stride: 1,
            width: w,
            height: h,
        };

        let rgb = frame.to_rgb();
        for y in 0..h {
            for x in 0..w {
                let px = rgb.at(x, y);
                assert!((px.r - px.g).abs() < 1e-3);
                assert!((px.g - px.b).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn luminance_matches_rec601() {
        let mut rgb = RgbImage::new(1, 1);
        *rgb.at_mut(0, 0) = Rgb::new(1.0, 0.0, 0.0);
        let lum = luminance(&rgb);
        assert!((*lum.at(0, 0) - 0.299).abs() < 1e-6);
    }

    #[test]
    fn rgb_is_clamped_to_unit_range() {
        let w = 2;
        let h = 2;
        let y_plane = vec![255u8; w * h];
        let u_plane = vec![255u8; 1];
        let v_plane = vec![255u8; 1];
        let frame = YuvFrame {
            y_plane: &y_plane,
            u_plane: &u_plane,
            v_plane: &v_plane,
            y_row_stride: w,
            uv_row_stride: 1,
            uv_pixel_stride: 1,
            width: w,
            height: h,
        };
        let rgb = frame.to_rgb();
        for px in rgb.iter() {
            assert!(px.r >= 0.0 && px.r <= 1.0);
            assert!(px.g >= 0.0 && px.g <= 1.0);
            assert!(px.b >= 0.0 && px.b <= 1.0);
        }
    }
}
