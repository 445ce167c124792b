//! Error types for manifest, I/O, and pipeline failures.

use std::path::PathBuf;

use stitch_core::placement::{Axis, PlacementError, SolverNotFound};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StitchError>;

/// Any failure raised by the stitching pipeline.
#[derive(Debug, Error)]
pub enum StitchError {
    /// Filesystem access failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Image decoding or encoding failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// Manifest (de)serialization failed.
    #[error("yaml error in {path}: {source}")]
    Yaml {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Input path is neither a tile folder nor a YAML manifest.
    #[error("input {path} is neither a folder nor a yaml manifest")]
    UnsupportedInput {
        /// Offending path.
        path: PathBuf,
    },

    /// A tile folder contained no usable images.
    #[error("no tile images found in {path}")]
    EmptyFolder {
        /// Scanned folder.
        path: PathBuf,
    },

    /// A tile filename does not encode stage coordinates.
    #[error("tile filename '{name}' does not match '{{x}}_{{y}}.{{ext}}'")]
    TileName {
        /// Offending filename.
        name: String,
    },

    /// Frame index past the end of an input stack.
    #[error("frame index {index} out of range (nfrms = {nfrms})")]
    FrameOutOfRange {
        /// Requested index.
        index: u32,
        /// Frames available.
        nfrms: u32,
    },

    /// Channel selector is not one of `r`, `g`, `b`.
    #[error("channel must be one of r, g, b (got '{requested}')")]
    InvalidChannel {
        /// The selector that was requested.
        requested: String,
    },

    /// A tile pair has no usable overlap under the configured bounds.
    #[error(
        "tiles {aname} and {bname} have no usable overlap \
         ({axis:?} overlap {overlap}, bounds dx {max_dx} dy {max_dy})"
    )]
    NoOverlap {
        /// Reference tile filename.
        aname: PathBuf,
        /// Neighbor tile filename.
        bname: PathBuf,
        /// Pair axis.
        axis: Axis,
        /// Configured nominal overlap.
        overlap: u32,
        /// Configured lateral bound.
        max_dx: u32,
        /// Configured along-axis bound.
        max_dy: u32,
    },

    /// Solver identifier rejected by the allow-list.
    #[error(transparent)]
    SolverNotFound(#[from] SolverNotFound),

    /// Global placement failed.
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

impl StitchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Yaml {
            path: path.into(),
            source,
        }
    }
}
