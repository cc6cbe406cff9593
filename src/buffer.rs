//! Typed 2-D pixel buffers (spec §3 "Image buffers").
//!
//! Every canonical element type in the spec (`Gray`, `RGB`, `Byte`,
//! `MotionVector`, `FlowVector`, `StructureTensor`) is carried by the same
//! generic [`Buffer<T>`] wrapper around a row-major [`ndarray::Array2`],
//! the way the teacher's `Frame` wraps an `Array2<f32>`.

use ndarray::Array2;

/// A 3-channel float pixel, values nominally in `[0,1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);

    /// Clamp each channel to `[0,1]`, replacing non-finite values with 0.
    pub fn sanitized(&self) -> Rgb {
        Rgb::new(sanitize_scalar(self.r), sanitize_scalar(self.g), sanitize_scalar(self.b))
    }
}

impl std::ops::Add for Rgb {
    type Output = Rgb;
    fn add(self, rhs: Rgb) -> Rgb {
        Rgb::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b)
    }
}

impl std::ops::Mul<f32> for Rgb {
    type Output = Rgb;
    fn mul(self, rhs: f32) -> Rgb {
        Rgb::new(self.r * rhs, self.g * rhs, self.b * rhs)
    }
}

fn sanitize_scalar(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A contiguous, row-major 2-D buffer of element type `T`.
///
/// `row_stride` is always `width` for an owned buffer — the attribute is
/// kept for parity with external row-pointer producers (spec §3), not
/// because this crate ever allocates padded rows.
#[derive(Clone, Debug)]
pub struct Buffer<T> {
    data: Array2<T>,
}

impl<T: Clone + Default> Buffer<T> {
    /// Construct a zero-filled buffer. An empty buffer has both dims 0;
    /// a mixed `0 x nonzero` or `nonzero x 0` shape is not a valid buffer.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(
            (width == 0) == (height == 0),
            "Buffer dimensions must be both zero or both nonzero, got {width}x{height}"
        );
        Self {
            data: Array2::from_elem((height, width), T::default()),
        }
    }
}

impl<T> Buffer<T> {
    /// Wrap an existing row-major `(height, width)` array.
    pub fn from_array(data: Array2<T>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn row_stride(&self) -> usize {
        self.width()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 && self.height() == 0
    }

    pub fn at(&self, x: usize, y: usize) -> &T {
        &self.data[[y, x]]
    }

    pub fn at_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[[y, x]]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        self.data.get((y, x))
    }

    pub fn row(&self, y: usize) -> ndarray::ArrayView1<'_, T> {
        self.data.row(y)
    }

    pub fn as_array(&self) -> &Array2<T> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.iter_mut()
    }
}

/// Grayscale float buffer, values in `[0,1]`.
pub type Gray = Buffer<f32>;

/// RGB float buffer, values in `[0,1]` per channel.
pub type RgbImage = Buffer<Rgb>;

/// 8-bit buffer (raw camera samples before float conversion).
pub type Byte = Buffer<u8>;

impl Gray {
    /// Replace non-finite values with 0 and clamp to `[0,1]`.
    /// Returns the number of elements that were replaced (spec §4.1).
    pub fn sanitize(&mut self) -> usize {
        let mut replaced = 0usize;
        for v in self.data.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
                replaced += 1;
            } else {
                let clamped = v.clamp(0.0, 1.0);
                if clamped != *v {
                    replaced += 1;
                }
                *v = clamped;
            }
        }
        replaced
    }
}

impl RgbImage {
    /// Replace non-finite channel values with 0 and clamp to `[0,1]`.
    /// Returns the number of *channel values* replaced (spec §4.1).
    pub fn sanitize(&mut self) -> usize {
        let mut replaced = 0usize;
        for px in self.data.iter_mut() {
            let s = px.sanitized();
            if s.r != px.r {
                replaced += 1;
            }
            if s.g != px.g {
                replaced += 1;
            }
            if s.b != px.b {
                replaced += 1;
            }
            *px = s;
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_both_dims_zero() {
        let b: Gray = Buffer::new(0, 0);
        assert!(b.is_empty());
    }

    #[test]
    #[should_panic]
    fn mixed_zero_dims_panics() {
        let _b: Gray = Buffer::new(0, 5);
    }

    #[test]
    fn sanitize_replaces_non_finite_and_clamps() {
        let mut b: Gray = Buffer::new(3, 1);
        *b.at_mut(0, 0) = f32::NAN;
        *b.at_mut(1, 0) = 2.0;
        *b.at_mut(2, 0) = -1.0;
        let count = b.sanitize();
        assert_eq!(count, 3);
        assert_eq!(*b.at(0, 0), 0.0);
        assert_eq!(*b.at(1, 0), 1.0);
        assert_eq!(*b.at(2, 0), 0.0);
    }

    #[test]
    fn element_count_matches_dims() {
        let b: Gray = Buffer::new(7, 5);
        assert_eq!(b.iter().count(), 35);
    }
}
