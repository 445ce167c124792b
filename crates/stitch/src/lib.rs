//! Microscopy tile stitching on top of `stitch-core`.
//!
//! This crate is organized into a few focused modules:
//! - [`filematrix`] – the YAML tile manifest: folder scanning, round-trip,
//!   grid queries.
//! - [`input`] – frame readers for single images and folders of JPEG frames.
//! - [`runner`] – pairwise registration and the end-to-end alignment driver.
//! - [`mosaic`] – feathered or first-wins mosaic rendering.
//! - [`app`] – JSON job configuration and the stage driver shared by the
//!   CLI examples.
//! - [`logger`] – a simple `log` implementation used by examples.

pub use stitch_core::*;

pub mod app;
pub mod error;
pub mod filematrix;
pub mod input;
pub mod logger;
pub mod mosaic;
pub mod runner;

pub use error::{Result, StitchError};
pub use filematrix::{FileMatrix, TileEntry};
pub use input::{Channel, InputFile};
pub use mosaic::{fuse_region, BlendMode, Rect};
pub use runner::Runner;

use image::GrayImage;

/// Widen an `image::GrayImage` into a core [`Patch`].
pub fn patch_from_gray(img: &GrayImage) -> Patch {
    Patch {
        w: img.width() as usize,
        h: img.height() as usize,
        data: img.as_raw().iter().map(|&v| v as f32).collect(),
    }
}

/// Measure where `template` best matches inside `search`.
///
/// Thin wrapper over [`xcorr::normxcorr`] for callers holding `GrayImage`s.
pub fn match_images(search: &GrayImage, template: &GrayImage) -> Option<xcorr::Placement> {
    xcorr::normxcorr(&patch_from_gray(search), &patch_from_gray(template)).best()
}
