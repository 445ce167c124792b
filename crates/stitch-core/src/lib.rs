//! Core primitives for stitching a grid of overlapping tile images.
//!
//! # Overview
//!
//! This crate exposes three building blocks, kept free of any image-format or
//! filesystem concerns (flat `f32` buffers in, flat buffers out):
//!
//! - [`xcorr`] – normalized cross-correlation of a template over a search
//!   strip, the measurement kernel for pairwise tile registration.
//! - [`placement`] – weighted least-squares solvers that turn pairwise shift
//!   measurements into absolute tile positions.
//! - [`fuse`] – center-weighted feather masks and the accumulation canvas
//!   used to blend registered tiles into a mosaic.
//!
//! # Features
//!
//! - `rayon` – parallelizes the dense correlation computation over output
//!   rows. This does not change numerical results, only performance on
//!   multi-core machines.
//! - `serde` – derives `Serialize`/`Deserialize` for the small enums that end
//!   up in manifests (`Axis`).

pub mod fuse;
pub mod placement;
pub mod xcorr;

use crate::placement::Axis;

/// Tunable parameters for pairwise tile registration.
///
/// Shift bounds are expressed in pixels. `max_dy` bounds the shift along the
/// stitching axis (the direction in which the pair overlaps), `max_dx` the
/// lateral shift orthogonal to it, and `max_dz` the frame shift for stacked
/// inputs. `overlap_v`/`overlap_h` are the nominal overlap extents for
/// vertical and horizontal neighbors; they must be chosen at least as large
/// as the true overlap, since the search can only shrink an overlap, not
/// grow it.
#[derive(Clone, Debug)]
pub struct AlignParams {
    /// Maximum allowed lateral shift, orthogonal to the stitching axis.
    pub max_dx: u32,
    /// Maximum allowed shift along the stitching axis.
    pub max_dy: u32,
    /// Maximum allowed frame shift along Z.
    pub max_dz: u32,
    /// Nominal overlap of horizontally adjacent tiles.
    pub overlap_h: u32,
    /// Nominal overlap of vertically adjacent tiles.
    pub overlap_v: u32,
    /// Number of Z samples measured per pair.
    pub z_samples: u32,
    /// Frame stride between consecutive Z samples.
    pub z_stride: u32,
    /// Aggregate Z samples by score-weighted average instead of best score.
    pub compute_average: bool,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            max_dx: 20,
            max_dy: 150,
            max_dz: 20,
            overlap_h: 600,
            overlap_v: 600,
            z_samples: 1,
            z_stride: 200,
            compute_average: false,
        }
    }
}

impl AlignParams {
    /// Nominal overlap for a pair straddling the given axis.
    #[inline]
    pub fn overlap(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Horizontal => self.overlap_h,
            Axis::Vertical => self.overlap_v,
        }
    }
}

/// Single-channel raster in row-major layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl Patch {
    /// Zero-filled patch.
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![0.0; w * h],
        }
    }

    /// Wrap an existing buffer; `None` if the length does not match.
    pub fn from_data(w: usize, h: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != w * h {
            return None;
        }
        Some(Self { w, h, data })
    }

    /// Widen an 8-bit raster; `None` if the length does not match.
    pub fn from_u8(w: usize, h: usize, data: &[u8]) -> Option<Self> {
        if data.len() != w * h {
            return None;
        }
        Some(Self {
            w,
            h,
            data: data.iter().map(|&v| v as f32).collect(),
        })
    }

    /// Value at an integer coordinate.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    /// Copy of the sub-rectangle clamped to the patch bounds.
    pub fn crop(&self, x0: usize, y0: usize, w: usize, h: usize) -> Self {
        let x0 = x0.min(self.w);
        let y0 = y0.min(self.h);
        let w = w.min(self.w - x0);
        let h = h.min(self.h - y0);

        let mut data = Vec::with_capacity(w * h);
        for y in y0..y0 + h {
            let off = y * self.w + x0;
            data.extend_from_slice(&self.data[off..off + w]);
        }
        Self { w, h, data }
    }

    /// Transposed copy (rows become columns). Horizontal pairs are registered
    /// by transposing both strips and reusing the vertical-axis math.
    pub fn transposed(&self) -> Self {
        let mut data = vec![0.0; self.w * self.h];
        for y in 0..self.h {
            for x in 0..self.w {
                data[x * self.h + y] = self.data[y * self.w + x];
            }
        }
        Self {
            w: self.h,
            h: self.w,
            data,
        }
    }
}
