//! Feathered fusion: center-weighted masks and weighted accumulation.
//!
//! Each tile contributes to the mosaic through a "squircle" mask: weight 1
//! in the tile center, falling to 0 at the border along a family of
//! superellipse shells whose exponent grows toward the border (a circle near
//! the center, nearly a rectangle at the rim). Overlapping tiles therefore
//! cross-fade over the full overlap width instead of producing a hard seam.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Patch;

/// Exponent schedule endpoints for the superellipse shells.
const P_INNER: f64 = 2.0;
const P_OUTER: f64 = 50.0;

/// Mask floor. Strictly positive so that pixels covered by a single tile
/// normalize back to the tile's own value even at the rim.
const MIN_WEIGHT: f32 = 1e-4;

/// Center-weighted feather mask for a `w x h` tile, row-major.
///
/// The mask is symmetric under horizontal and vertical flips, 1.0 at the
/// center and `MIN_WEIGHT` at the corners.
pub fn squircle_weights(w: usize, h: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; w * h];
    if w == 0 || h == 0 {
        return out;
    }

    let shells = Shells::new(w, h);
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;

    let corner = shells.level(cx, cy);
    let scale = if corner > 0.0 { corner } else { 1.0 };

    for y in 0..h {
        let v = (y as f64 - cy).abs();
        for x in 0..w {
            let u = (x as f64 - cx).abs();
            let level = shells.level(u, v) / scale;
            out[y * w + x] = ((1.0 - level) as f32).max(MIN_WEIGHT);
        }
    }
    out
}

/// Superellipse shell family for one tile size.
struct Shells {
    n: usize,
    dra: f64,
    drb: f64,
    ps: Vec<f64>,
    alpha: Vec<f64>,
    ras: Vec<f64>,
    rbs: Vec<f64>,
}

impl Shells {
    fn new(w: usize, h: usize) -> Self {
        let a = (w / 2).max(1);
        let b = (h / 2).max(1);
        let n = a.max(b);

        let lg_lo = P_INNER.log10();
        let lg_hi = P_OUTER.log10();
        let frac = |i: usize| {
            if n > 1 {
                i as f64 / (n - 1) as f64
            } else {
                0.0
            }
        };

        let ps = (0..n)
            .map(|i| 10f64.powf(lg_lo + (lg_hi - lg_lo) * frac(i)))
            .collect();
        let alpha = (0..n).map(frac).collect();

        let dra = a as f64 / n as f64;
        let drb = b as f64 / n as f64;
        let ras = (0..n).map(|i| i as f64 * dra + 1.0).collect();
        let rbs = (0..n).map(|i| i as f64 * drb + 1.0).collect();

        Self {
            n,
            dra,
            drb,
            ps,
            alpha,
            ras,
            rbs,
        }
    }

    /// Squared ramp value of the innermost shell containing `(u, v)`, where
    /// `u`/`v` are absolute offsets from the tile center.
    fn level(&self, u: f64, v: f64) -> f64 {
        let mut i = ((u / self.dra).max(v / self.drb)) as usize;
        if i >= self.n {
            i = self.n - 1;
        }
        while i < self.n {
            let p = self.ps[i];
            let c = (u / self.ras[i]).powf(p) + (v / self.rbs[i]).powf(p);
            if c < 1.0 {
                break;
            }
            i += 1;
        }
        if i >= self.n {
            i = self.n - 1;
        }
        let a = self.alpha[i];
        a * a
    }
}

/// Memoized feather masks keyed by tile size; a grid usually contains a
/// single tile size, so masks are computed once.
#[derive(Default)]
pub struct WeightCache {
    masks: HashMap<(usize, usize), Arc<Vec<f32>>>,
}

impl WeightCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask for a `w x h` tile, computing it on first use.
    pub fn get(&mut self, w: usize, h: usize) -> Arc<Vec<f32>> {
        self.masks
            .entry((w, h))
            .or_insert_with(|| Arc::new(squircle_weights(w, h)))
            .clone()
    }
}

/// Weighted accumulation canvas.
///
/// Tiles are added with per-pixel weights; [`Accumulator::finish`] divides
/// the accumulated values by the accumulated weights. Pixels never touched
/// by any tile stay 0. Tiles reaching outside the canvas are clipped.
pub struct Accumulator {
    pub w: usize,
    pub h: usize,
    sum: Vec<f64>,
    weight: Vec<f64>,
}

impl Accumulator {
    /// Zeroed canvas.
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            sum: vec![0.0; w * h],
            weight: vec![0.0; w * h],
        }
    }

    /// Accumulate `tile` with its top-left corner at `(x0, y0)` on the
    /// canvas, weighting each pixel by `weights` (same layout as the tile).
    pub fn add(&mut self, tile: &Patch, x0: i64, y0: i64, weights: &[f32]) {
        debug_assert_eq!(weights.len(), tile.data.len());

        for ty in 0..tile.h {
            let cy = y0 + ty as i64;
            if cy < 0 || cy >= self.h as i64 {
                continue;
            }
            let canvas_row = cy as usize * self.w;
            let tile_row = ty * tile.w;
            for tx in 0..tile.w {
                let cx = x0 + tx as i64;
                if cx < 0 || cx >= self.w as i64 {
                    continue;
                }
                let wgt = weights[tile_row + tx] as f64;
                if wgt <= 0.0 {
                    continue;
                }
                let ci = canvas_row + cx as usize;
                self.sum[ci] += tile.data[tile_row + tx] as f64 * wgt;
                self.weight[ci] += wgt;
            }
        }
    }

    /// Normalize into the blended plane.
    pub fn finish(self) -> Patch {
        let mut data = vec![0.0f32; self.w * self.h];
        for (i, out) in data.iter_mut().enumerate() {
            if self.weight[i] > 0.0 {
                *out = (self.sum[i] / self.weight[i]) as f32;
            }
        }
        Patch {
            w: self.w,
            h: self.h,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_centered_and_symmetric() {
        let (w, h) = (21, 13);
        let m = squircle_weights(w, h);

        let center = m[(h / 2) * w + w / 2];
        assert!((center - 1.0).abs() < 1e-6, "center weight {center}");
        assert!((m[0] - MIN_WEIGHT).abs() < 1e-6, "corner weight {}", m[0]);

        for y in 0..h {
            for x in 0..w {
                let v = m[y * w + x];
                assert!((v - m[y * w + (w - 1 - x)]).abs() < 1e-6);
                assert!((v - m[(h - 1 - y) * w + x]).abs() < 1e-6);
                assert!(v >= MIN_WEIGHT && v <= 1.0);
            }
        }
    }

    #[test]
    fn mask_handles_degenerate_sizes() {
        assert_eq!(squircle_weights(1, 1), vec![1.0]);
        assert!(squircle_weights(0, 4).is_empty());
    }

    #[test]
    fn cache_reuses_masks() {
        let mut cache = WeightCache::new();
        let a = cache.get(8, 6);
        let b = cache.get(8, 6);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn single_tile_is_reproduced_exactly() {
        let tile = Patch::from_data(4, 3, (0..12).map(|v| v as f32 * 7.0).collect()).unwrap();
        let weights = squircle_weights(4, 3);

        let mut acc = Accumulator::new(10, 8);
        acc.add(&tile, 3, 2, &weights);
        let out = acc.finish();

        for ty in 0..3 {
            for tx in 0..4 {
                let got = out.at(3 + tx, 2 + ty);
                let want = tile.at(tx, ty);
                assert!((got - want).abs() < 1e-3, "({tx},{ty}): {got} vs {want}");
            }
        }
        assert_eq!(out.at(0, 0), 0.0);
    }

    #[test]
    fn overlap_blends_between_contributors() {
        let lo = Patch::from_data(4, 4, vec![10.0; 16]).unwrap();
        let hi = Patch::from_data(4, 4, vec![30.0; 16]).unwrap();
        let weights = vec![1.0f32; 16];

        let mut acc = Accumulator::new(6, 4);
        acc.add(&lo, 0, 0, &weights);
        acc.add(&hi, 2, 0, &weights);
        let out = acc.finish();

        assert_eq!(out.at(0, 1), 10.0);
        assert_eq!(out.at(5, 1), 30.0);
        let mid = out.at(3, 1);
        assert!((10.0..=30.0).contains(&mid), "blended value {mid}");
    }

    #[test]
    fn tiles_outside_canvas_are_clipped() {
        let tile = Patch::from_data(4, 4, vec![5.0; 16]).unwrap();
        let weights = vec![1.0f32; 16];
        let mut acc = Accumulator::new(4, 4);
        acc.add(&tile, -2, -2, &weights);
        let out = acc.finish();
        assert_eq!(out.at(0, 0), 5.0);
        assert_eq!(out.at(3, 3), 0.0);
    }
}
