//! The tile manifest ("filematrix"): folder scanning, YAML round-trip, and
//! grid queries.
//!
//! A manifest is a YAML document with a `filematrix:` list of tile entries
//! and, for aligned outputs, an `xcorr:` list of the pairwise registration
//! records that produced the positions. Tile filenames in a scanned folder
//! encode the acquisition stage position as `{x}_{y}.{ext}` in micrometers;
//! the scanner converts those to nominal pixel positions with a
//! pixels-per-micrometer calibration ratio.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stitch_core::placement::Axis;

use crate::error::{Result, StitchError};

/// Image extensions accepted when scanning a tile folder.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// One tile of the grid: nominal pixel position, source file, and frame
/// geometry. Field names match the manifest document.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TileEntry {
    /// Nominal X position on the mosaic canvas, in pixels.
    #[serde(rename = "X")]
    pub x: i64,
    /// Nominal Y position, in pixels.
    #[serde(rename = "Y")]
    pub y: i64,
    /// Nominal Z position, in frames.
    #[serde(rename = "Z")]
    pub z: i64,
    /// Source image file (or folder of frames).
    pub filename: PathBuf,
    /// Number of frames in the tile's stack.
    pub nfrms: u32,
    /// Frame width in pixels.
    pub xsize: u32,
    /// Frame height in pixels.
    pub ysize: u32,
}

/// Pairwise registration record kept alongside aligned manifests.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct XcorrRecord {
    /// Reference tile file.
    pub aname: PathBuf,
    /// Displaced tile file.
    pub bname: PathBuf,
    /// Pair axis.
    pub axis: Axis,
    /// Measured displacement along X, in pixels.
    pub dx: f32,
    /// Measured displacement along Y, in pixels.
    pub dy: f32,
    /// Measured displacement along Z, in frames.
    pub dz: f32,
    /// NCC score of the measurement.
    pub score: f32,
}

/// The tile manifest.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FileMatrix {
    /// Tile entries, ordered row-major.
    pub filematrix: Vec<TileEntry>,
    /// Pairwise registration records (present on aligned manifests).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xcorr: Vec<XcorrRecord>,
}

impl FileMatrix {
    /// Open a stitching input: a directory is scanned for tile images, a
    /// `.yml`/`.yaml` file is parsed as a manifest.
    pub fn open(path: &Path, ratio_px_um: f64) -> Result<Self> {
        if path.is_dir() {
            return Self::scan_folder(path, ratio_px_um);
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml") => {
                Self::load_yaml(path)
            }
            _ => Err(StitchError::UnsupportedInput {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Build a manifest from a folder of `{x}_{y}.{ext}` tile images.
    ///
    /// Stage coordinates are micrometers; the grid origin is the per-axis
    /// minimum, and nominal pixel positions are
    /// `round((c - c_origin) * ratio_px_um)`. Image sizes are probed from
    /// file headers without decoding pixel data.
    pub fn scan_folder(dir: &Path, ratio_px_um: f64) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| StitchError::io(dir, e))?;

        let mut found: Vec<(i64, i64, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StitchError::io(dir, e))?;
            let path = entry.path();
            if !is_image_file(&path) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = name.rsplit_once('.').map_or(name.as_str(), |(s, _)| s);
            let (x, y) = parse_stage_coords(stem).ok_or(StitchError::TileName { name })?;
            found.push((x, y, path));
        }

        if found.is_empty() {
            return Err(StitchError::EmptyFolder {
                path: dir.to_path_buf(),
            });
        }

        let x0 = found.iter().map(|t| t.0).min().unwrap_or(0);
        let y0 = found.iter().map(|t| t.1).min().unwrap_or(0);

        let mut tiles = Vec::with_capacity(found.len());
        for (x_um, y_um, path) in found {
            let (xsize, ysize) = image::image_dimensions(&path)?;
            tiles.push(TileEntry {
                x: (((x_um - x0) as f64) * ratio_px_um).round() as i64,
                y: (((y_um - y0) as f64) * ratio_px_um).round() as i64,
                z: 0,
                filename: path,
                nfrms: 1,
                xsize,
                ysize,
            });
        }
        tiles.sort_by_key(|t| (t.y, t.x));

        Ok(Self {
            filematrix: tiles,
            xcorr: Vec::new(),
        })
    }

    /// Parse a manifest file.
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| StitchError::io(path, e))?;
        serde_yaml::from_reader(file).map_err(|e| StitchError::yaml(path, e))
    }

    /// Write the manifest.
    pub fn save_yaml(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| StitchError::io(path, e))?;
        serde_yaml::to_writer(file, self).map_err(|e| StitchError::yaml(path, e))
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.filematrix.len()
    }

    /// Whether the manifest has no tiles.
    pub fn is_empty(&self) -> bool {
        self.filematrix.is_empty()
    }

    /// Tile indices grouped into rows (equal nominal Y), each row sorted by
    /// X, rows sorted by Y.
    pub fn rows(&self) -> Vec<Vec<usize>> {
        self.grouped(|t| (t.y, t.x))
    }

    /// Tile indices grouped into columns (equal nominal X), each column
    /// sorted by Y, columns sorted by X.
    pub fn columns(&self) -> Vec<Vec<usize>> {
        self.grouped(|t| (t.x, t.y))
    }

    fn grouped(&self, key: impl Fn(&TileEntry) -> (i64, i64)) -> Vec<Vec<usize>> {
        let mut groups: BTreeMap<i64, Vec<(i64, usize)>> = BTreeMap::new();
        for (idx, tile) in self.filematrix.iter().enumerate() {
            let (group, order) = key(tile);
            groups.entry(group).or_default().push((order, idx));
        }
        groups
            .into_values()
            .map(|mut members| {
                members.sort();
                members.into_iter().map(|(_, idx)| idx).collect()
            })
            .collect()
    }

    /// Bounding box of all tiles: `(x, y, w, h)` in canvas pixels.
    pub fn bounds(&self) -> (i64, i64, u32, u32) {
        if self.filematrix.is_empty() {
            return (0, 0, 0, 0);
        }
        let mut x0 = i64::MAX;
        let mut y0 = i64::MAX;
        let mut x1 = i64::MIN;
        let mut y1 = i64::MIN;
        for t in &self.filematrix {
            x0 = x0.min(t.x);
            y0 = y0.min(t.y);
            x1 = x1.max(t.x + t.xsize as i64);
            y1 = y1.max(t.y + t.ysize as i64);
        }
        (x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
    }
}

fn is_image_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Parse `{x}_{y}` stage coordinates from a filename stem.
fn parse_stage_coords(stem: &str) -> Option<(i64, i64)> {
    let (xs, ys) = stem.split_once('_')?;
    Some((xs.parse().ok()?, ys.parse().ok()?))
}
