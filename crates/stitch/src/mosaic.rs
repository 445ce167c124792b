//! Mosaic rendering: feathered blending or first-tile-wins overwrite.
//!
//! Rendering works from an aligned manifest. The full mosaic covers the
//! tight bounding box of all tiles; [`fuse_region`] renders only a window of
//! the canvas and decodes only the tiles that intersect it, which is the
//! programmatic-access path for mosaics too large to hold in memory at once.

use std::str::FromStr;

use image::RgbImage;
use stitch_core::fuse::{Accumulator, WeightCache};
use stitch_core::Patch;

use crate::error::Result;
use crate::filematrix::FileMatrix;
use crate::input::InputFile;

/// How overlapping tiles are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Cross-fade overlaps with center-weighted squircle masks.
    #[default]
    Feather,
    /// First tile to touch a pixel wins; later tiles fill only fresh pixels.
    First,
}

impl FromStr for BlendMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "feather" => Ok(Self::Feather),
            "first" => Ok(Self::First),
            other => Err(format!("invalid blend mode '{other}', expected feather|first")),
        }
    }
}

/// Window of the mosaic canvas, in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i64,
    /// Top edge.
    pub y: i64,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

impl Rect {
    fn intersects(&self, x: i64, y: i64, w: u32, h: u32) -> bool {
        x < self.x + self.w as i64
            && y < self.y + self.h as i64
            && x + w as i64 > self.x
            && y + h as i64 > self.y
    }
}

/// Render the full mosaic.
pub fn fuse(fm: &FileMatrix, mode: BlendMode) -> Result<RgbImage> {
    let (x, y, w, h) = fm.bounds();
    fuse_region(fm, Rect { x, y, w, h }, mode)
}

/// Render one window of the mosaic, decoding only intersecting tiles.
///
/// Each tile contributes its central frame. Output pixels covered by no tile
/// stay black.
pub fn fuse_region(fm: &FileMatrix, rect: Rect, mode: BlendMode) -> Result<RgbImage> {
    match mode {
        BlendMode::Feather => fuse_feather(fm, rect),
        BlendMode::First => fuse_first(fm, rect),
    }
}

fn fuse_feather(fm: &FileMatrix, rect: Rect) -> Result<RgbImage> {
    let w = rect.w as usize;
    let h = rect.h as usize;
    let mut acc = [
        Accumulator::new(w, h),
        Accumulator::new(w, h),
        Accumulator::new(w, h),
    ];
    let mut masks = WeightCache::new();

    for tile in &fm.filematrix {
        if !rect.intersects(tile.x, tile.y, tile.xsize, tile.ysize) {
            continue;
        }
        let input = InputFile::open(&tile.filename)?;
        let rgb = input.frame_rgb(input.central_frame())?;
        let mask = masks.get(rgb.width() as usize, rgb.height() as usize);

        let x0 = tile.x - rect.x;
        let y0 = tile.y - rect.y;
        for (c, acc_plane) in acc.iter_mut().enumerate() {
            let plane = rgb_plane(&rgb, c);
            acc_plane.add(&plane, x0, y0, &mask);
        }
    }

    let planes = acc.map(Accumulator::finish);
    Ok(planes_to_rgb(&planes, rect.w, rect.h))
}

fn fuse_first(fm: &FileMatrix, rect: Rect) -> Result<RgbImage> {
    let w = rect.w as usize;
    let h = rect.h as usize;
    let mut out = RgbImage::new(rect.w, rect.h);
    let mut filled = vec![false; w * h];

    for tile in &fm.filematrix {
        if !rect.intersects(tile.x, tile.y, tile.xsize, tile.ysize) {
            continue;
        }
        let input = InputFile::open(&tile.filename)?;
        let rgb = input.frame_rgb(input.central_frame())?;

        let x0 = tile.x - rect.x;
        let y0 = tile.y - rect.y;
        for (tx, ty, px) in rgb.enumerate_pixels() {
            let cx = x0 + tx as i64;
            let cy = y0 + ty as i64;
            if cx < 0 || cy < 0 || cx >= rect.w as i64 || cy >= rect.h as i64 {
                continue;
            }
            let idx = cy as usize * w + cx as usize;
            if !filled[idx] {
                filled[idx] = true;
                out.put_pixel(cx as u32, cy as u32, *px);
            }
        }
    }

    Ok(out)
}

fn rgb_plane(rgb: &RgbImage, channel: usize) -> Patch {
    let data = rgb.pixels().map(|p| p[channel] as f32).collect();
    Patch {
        w: rgb.width() as usize,
        h: rgb.height() as usize,
        data,
    }
}

fn planes_to_rgb(planes: &[Patch; 3], w: u32, h: u32) -> RgbImage {
    let mut out = RgbImage::new(w, h);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let i = y as usize * w as usize + x as usize;
        for c in 0..3 {
            px[c] = planes[c].data[i].round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_mode_parses() {
        assert_eq!("feather".parse::<BlendMode>().unwrap(), BlendMode::Feather);
        assert_eq!("first".parse::<BlendMode>().unwrap(), BlendMode::First);
        let err = "median".parse::<BlendMode>().unwrap_err();
        assert!(err.contains("feather|first"), "{err}");
    }

    #[test]
    fn rect_intersection() {
        let r = Rect {
            x: 10,
            y: 10,
            w: 20,
            h: 20,
        };
        assert!(r.intersects(0, 0, 15, 15));
        assert!(r.intersects(29, 29, 5, 5));
        assert!(!r.intersects(30, 10, 5, 5));
        assert!(!r.intersects(0, 0, 10, 10));
    }

    #[test]
    fn empty_matrix_renders_empty_image() {
        let fm = FileMatrix::default();
        let img = fuse(&fm, BlendMode::Feather).unwrap();
        assert_eq!((img.width(), img.height()), (0, 0));
    }
}
