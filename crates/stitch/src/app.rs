//! Shared application-level helpers for CLI and examples.
//!
//! These functions wire up I/O (manifest scanning, alignment, YAML/PNG
//! output) around the `stitch` pipeline so both the CLI examples and
//! downstream tools can share the same behavior.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stitch_core::placement::Solver;

use crate::filematrix::FileMatrix;
use crate::input::Channel;
use crate::mosaic::{fuse, BlendMode};
use crate::runner::Runner;
use crate::{logger, AlignParams};

/// Default manifest filename written next to the tiles.
pub const DEFAULT_MANIFEST_NAME: &str = "filematrix.yaml";

/// Which pipeline stage(s) to run.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Scan a tile folder and write the manifest only.
    Manifest,
    /// Register and place tiles, producing an aligned manifest.
    Align,
    /// Render a mosaic from an already-aligned manifest.
    Fuse,
    /// Align and render in one go, with no intermediate manifest file.
    Full,
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manifest" => Ok(JobMode::Manifest),
            "align" => Ok(JobMode::Align),
            "fuse" => Ok(JobMode::Fuse),
            "full" => Ok(JobMode::Full),
            other => Err(format!(
                "invalid mode '{other}', expected manifest|align|fuse|full"
            )),
        }
    }
}

/// Job configuration, loadable from JSON. Unset fields fall back to the
/// built-in defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StitchConfig {
    /// Stitching input: tile folder or manifest path.
    pub input: PathBuf,
    /// Pipeline stage(s); defaults to `full`.
    pub mode: Option<JobMode>,
    /// Stage-to-pixel calibration for scanned folders.
    pub ratio_px_um: Option<f64>,
    /// Registration channel: `r`, `g` or `b`.
    pub channel: Option<String>,
    /// Placement backend identifier.
    pub solver: Option<String>,
    /// Lateral shift bound.
    pub max_dx: Option<u32>,
    /// Along-axis shift bound.
    pub max_dy: Option<u32>,
    /// Z shift bound.
    pub max_dz: Option<u32>,
    /// Nominal horizontal overlap.
    pub overlap_h: Option<u32>,
    /// Nominal vertical overlap.
    pub overlap_v: Option<u32>,
    /// Z samples per pair.
    pub z_samples: Option<u32>,
    /// Stride between Z samples.
    pub z_stride: Option<u32>,
    /// Score-weighted Z aggregation instead of best-of.
    pub compute_average: Option<bool>,
    /// Keep the aligned manifest in memory only.
    pub return_fm: Option<bool>,
    /// Aligned manifest output path.
    pub output_yaml: Option<PathBuf>,
    /// Mosaic output path.
    pub output_png: Option<PathBuf>,
    /// Blend mode: `feather` or `first`.
    pub blend: Option<String>,
    /// Log level name.
    pub log_level: Option<String>,
}

/// Load a job configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<StitchConfig> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening config {}", path.display()))?;
    let cfg: StitchConfig = serde_json::from_reader(file)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}

/// Run a configured job end to end.
pub fn run_job(cfg: &StitchConfig) -> Result<()> {
    match cfg.log_level.as_deref() {
        Some(level) => logger::init(logger::level_from_str(level)),
        None => logger::init_from_env(),
    }

    let mode = cfg.mode.unwrap_or(JobMode::Full);
    let ratio = cfg.ratio_px_um.unwrap_or(1.0);

    match mode {
        JobMode::Manifest => run_manifest(cfg, ratio),
        JobMode::Align => {
            run_align(cfg, ratio)?;
            Ok(())
        }
        JobMode::Fuse => {
            let fm = FileMatrix::open(&cfg.input, ratio)?;
            run_fuse(cfg, &fm)
        }
        JobMode::Full => {
            let fm = run_align(cfg, ratio)?;
            run_fuse(cfg, &fm)
        }
    }
}

fn run_manifest(cfg: &StitchConfig, ratio: f64) -> Result<()> {
    let started = Instant::now();
    let fm = FileMatrix::scan_folder(&cfg.input, ratio)
        .with_context(|| format!("scanning {}", cfg.input.display()))?;

    let out = cfg
        .output_yaml
        .clone()
        .unwrap_or_else(|| cfg.input.join(DEFAULT_MANIFEST_NAME));
    fm.save_yaml(&out)?;

    log::info!(
        "manifest: {} tiles -> {} ({:.1} ms)",
        fm.len(),
        out.display(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn run_align(cfg: &StitchConfig, ratio: f64) -> Result<FileMatrix> {
    let runner = build_runner(cfg)?;
    let started = Instant::now();
    let aligned = runner.run(&cfg.input, ratio)?;
    log::info!(
        "align: {} tiles, {} pair measurements ({:.1} ms)",
        aligned.len(),
        aligned.xcorr.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(aligned)
}

fn run_fuse(cfg: &StitchConfig, fm: &FileMatrix) -> Result<()> {
    let blend = match cfg.blend.as_deref() {
        Some(s) => s.parse::<BlendMode>().map_err(anyhow::Error::msg)?,
        None => BlendMode::default(),
    };

    let started = Instant::now();
    let img = fuse(fm, blend)?;

    let out = cfg
        .output_png
        .clone()
        .unwrap_or_else(|| cfg.input.with_extension("mosaic.png"));
    img.save(&out)?;

    log::info!(
        "fuse: {}x{} mosaic -> {} ({:.1} ms)",
        img.width(),
        img.height(),
        out.display(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Build a [`Runner`] from the config, applying overrides over defaults.
pub fn build_runner(cfg: &StitchConfig) -> Result<Runner> {
    let mut params = AlignParams::default();
    apply_params_overrides(&mut params, cfg);

    let channel = match cfg.channel.as_deref() {
        Some(s) => Some(s.parse::<Channel>()?),
        None => None,
    };
    let solver = match cfg.solver.as_deref() {
        Some(s) => s.parse::<Solver>()?,
        None => Solver::default(),
    };

    let mut runner = Runner::new()
        .with_params(params)
        .with_channel(channel)
        .with_solver(solver)
        .with_return_fm(cfg.return_fm.unwrap_or(false));
    if let Some(path) = &cfg.output_yaml {
        runner = runner.with_output_file(path);
    }
    Ok(runner)
}

fn apply_params_overrides(params: &mut AlignParams, cfg: &StitchConfig) {
    if let Some(v) = cfg.max_dx {
        params.max_dx = v;
    }
    if let Some(v) = cfg.max_dy {
        params.max_dy = v;
    }
    if let Some(v) = cfg.max_dz {
        params.max_dz = v;
    }
    if let Some(v) = cfg.overlap_h {
        params.overlap_h = v;
    }
    if let Some(v) = cfg.overlap_v {
        params.overlap_v = v;
    }
    if let Some(v) = cfg.z_samples {
        params.z_samples = v;
    }
    if let Some(v) = cfg.z_stride {
        params.z_stride = v;
    }
    if let Some(v) = cfg.compute_average {
        params.compute_average = v;
    }
}
