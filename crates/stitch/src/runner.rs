//! Pairwise tile registration and the end-to-end alignment driver.
//!
//! The runner walks the tile grid, registers every pair of adjacent tiles
//! along both axes with a bounded NCC search inside the nominal overlap
//! region, aggregates per-pair Z samples, and solves global placement with
//! the configured backend. The aligned manifest is always returned in
//! memory; writing the YAML output file is skipped when `return_fm` is set,
//! which is the "no temporary file" path for callers that feed the result
//! straight into fusion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use stitch_core::placement::{solve_positions, Axis, PairShift, Solver};
use stitch_core::xcorr::{normxcorr, Placement};
use stitch_core::{AlignParams, Patch};

use crate::error::{Result, StitchError};
use crate::filematrix::{FileMatrix, XcorrRecord};
use crate::input::{Channel, InputFile};
use crate::patch_from_gray;

/// One registration job: a pair of adjacent tiles at one Z sample.
#[derive(Clone, Copy, Debug)]
struct PairJob {
    a: usize,
    b: usize,
    axis: Axis,
    z_frame: u32,
}

/// Raw measurement produced by one registration job.
#[derive(Clone, Copy, Debug)]
struct SampleShift {
    a: usize,
    b: usize,
    axis: Axis,
    dx: f32,
    dy: f32,
    dz: f32,
    score: f32,
}

/// Alignment driver.
///
/// Configure with the builder methods, then call [`Runner::run`] with the
/// stitching input (tile folder or manifest path) or [`Runner::run_matrix`]
/// with an already-loaded manifest.
#[derive(Clone, Debug)]
pub struct Runner {
    /// Registration parameters.
    pub params: AlignParams,
    /// Registration channel; luma when unset.
    pub channel: Option<Channel>,
    /// Placement backend.
    pub solver: Solver,
    /// Aligned manifest output path.
    pub output_file: Option<PathBuf>,
    /// Skip writing `output_file`; the caller keeps the returned manifest.
    pub return_fm: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            params: AlignParams::default(),
            channel: None,
            solver: Solver::default(),
            output_file: None,
            return_fm: false,
        }
    }
}

impl Runner {
    /// Runner with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the registration parameters.
    pub fn with_params(mut self, params: AlignParams) -> Self {
        self.params = params;
        self
    }

    /// Set the registration channel.
    pub fn with_channel(mut self, channel: Option<Channel>) -> Self {
        self.channel = channel;
        self
    }

    /// Set the placement backend.
    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    /// Set the aligned manifest output path.
    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Keep the result in memory only; no output file is written.
    pub fn with_return_fm(mut self, return_fm: bool) -> Self {
        self.return_fm = return_fm;
        self
    }

    /// Open the stitching input (tile folder or manifest) and align it.
    pub fn run(&self, input: &Path, ratio_px_um: f64) -> Result<FileMatrix> {
        let fm = FileMatrix::open(input, ratio_px_um)?;
        self.run_matrix(&fm)
    }

    /// Align an already-loaded manifest.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, fm), fields(tiles = fm.len()))
    )]
    pub fn run_matrix(&self, fm: &FileMatrix) -> Result<FileMatrix> {
        let jobs = enumerate_jobs(fm, &self.params);
        log::info!("registering {} jobs over {} tiles", jobs.len(), fm.len());

        let done = AtomicUsize::new(0);
        let total = jobs.len();
        let measure = |job: &PairJob| -> Result<SampleShift> {
            let sample = self.register_job(fm, job)?;
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            log::debug!(
                "[{n}/{total}] {} ~ {} {:?} z {} -> dx {:.1} dy {:.1} dz {:.0} score {:.3}",
                fm.filematrix[job.a].filename.display(),
                fm.filematrix[job.b].filename.display(),
                job.axis,
                job.z_frame,
                sample.dx,
                sample.dy,
                sample.dz,
                sample.score,
            );
            Ok(sample)
        };

        #[cfg(feature = "rayon")]
        let samples = jobs.par_iter().map(measure).collect::<Result<Vec<_>>>()?;
        #[cfg(not(feature = "rayon"))]
        let samples = jobs.iter().map(measure).collect::<Result<Vec<_>>>()?;

        let shifts = aggregate(samples, self.params.compute_average);
        let positions = solve_positions(fm.len(), &shifts, self.solver)?;

        let mut aligned = fm.clone();
        for (tile, pos) in aligned.filematrix.iter_mut().zip(&positions) {
            tile.x = pos[0].round() as i64;
            tile.y = pos[1].round() as i64;
            tile.z = pos[2].round() as i64;
        }
        aligned.xcorr = shifts
            .iter()
            .map(|s| XcorrRecord {
                aname: fm.filematrix[s.a].filename.clone(),
                bname: fm.filematrix[s.b].filename.clone(),
                axis: s.axis,
                dx: s.dx,
                dy: s.dy,
                dz: s.dz,
                score: s.score,
            })
            .collect();

        if !self.return_fm {
            if let Some(path) = &self.output_file {
                aligned.save_yaml(path)?;
                log::info!("wrote aligned manifest to {}", path.display());
            }
        }

        Ok(aligned)
    }

    /// Register one adjacent pair at one Z sample.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip(self, fm))
    )]
    fn register_job(&self, fm: &FileMatrix, job: &PairJob) -> Result<SampleShift> {
        let ta = &fm.filematrix[job.a];
        let tb = &fm.filematrix[job.b];
        let p = &self.params;
        let overlap = p.overlap(job.axis) as usize;
        let max_along = p.max_dy as usize;
        let max_lat = p.max_dx as usize;

        let fa = InputFile::open(&ta.filename)?.with_channel(self.channel);
        let fb = InputFile::open(&tb.filename)?.with_channel(self.channel);

        let b_patch = oriented(&patch_from_gray(&fb.frame(job.z_frame)?), job.axis);

        let z_lo = job.z_frame.saturating_sub(p.max_dz);
        let z_hi = (job.z_frame + p.max_dz).min(fa.nfrms.saturating_sub(1));

        let mut best: Option<(i64, Placement)> = None;
        for z in z_lo..=z_hi {
            let a_patch = oriented(&patch_from_gray(&fa.frame(z)?), job.axis);
            if let Some(pl) = strip_search(&a_patch, &b_patch, overlap, max_along, max_lat) {
                let dz = z as i64 - job.z_frame as i64;
                if best.map_or(true, |(_, b)| pl.score > b.score) {
                    best = Some((dz, pl));
                }
            }
        }

        let (dz, pl) = best.ok_or_else(|| StitchError::NoOverlap {
            aname: ta.filename.clone(),
            bname: tb.filename.clone(),
            axis: job.axis,
            overlap: p.overlap(job.axis),
            max_dx: p.max_dx,
            max_dy: p.max_dy,
        })?;

        // Placement (u, v) of the trimmed template inside the trailing strip
        // maps to an origin displacement: the template slid v pixels along
        // the stitching axis (shrinking the overlap) and u - max_lat pixels
        // laterally.
        let along = |size: u32| size as f32 - overlap as f32 + pl.v as f32;
        let lateral = pl.u as f32 - max_lat as f32;
        let (dx, dy) = match job.axis {
            Axis::Vertical => (lateral, along(ta.ysize)),
            Axis::Horizontal => (along(ta.xsize), lateral),
        };

        Ok(SampleShift {
            a: job.a,
            b: job.b,
            axis: job.axis,
            dx,
            dy,
            dz: dz as f32,
            score: pl.score,
        })
    }
}

/// Transpose horizontal pairs so a single vertical-axis search covers both
/// orientations.
fn oriented(patch: &Patch, axis: Axis) -> Patch {
    match axis {
        Axis::Vertical => patch.clone(),
        Axis::Horizontal => patch.transposed(),
    }
}

/// NCC search of tile B's leading strip inside tile A's trailing strip.
///
/// `a`/`b` are full frames in stitching orientation (overlap along rows).
/// Returns `None` when the configured overlap and bounds leave no usable
/// template.
fn strip_search(
    a: &Patch,
    b: &Patch,
    overlap: usize,
    max_along: usize,
    max_lat: usize,
) -> Option<Placement> {
    if overlap == 0 || overlap > a.h || overlap <= max_along {
        return None;
    }
    if b.w <= 2 * max_lat {
        return None;
    }

    let search = a.crop(0, a.h - overlap, a.w, overlap);
    let template_h = (overlap - max_along).min(b.h);
    let template = b.crop(max_lat, 0, b.w - 2 * max_lat, template_h);

    if template.w == 0 || template.h == 0 || template.w > search.w || template.h > search.h {
        return None;
    }

    normxcorr(&search, &template).best()
}

fn enumerate_jobs(fm: &FileMatrix, params: &AlignParams) -> Vec<PairJob> {
    let mut jobs = Vec::new();

    let mut push_pairs = |groups: Vec<Vec<usize>>, axis: Axis| {
        for group in groups {
            for win in group.windows(2) {
                let (a, b) = (win[0], win[1]);
                let nfrms = fm.filematrix[a].nfrms.min(fm.filematrix[b].nfrms);
                for z_frame in z_frames(nfrms, params.z_samples, params.z_stride) {
                    jobs.push(PairJob {
                        a,
                        b,
                        axis,
                        z_frame,
                    });
                }
            }
        }
    };

    push_pairs(fm.rows(), Axis::Horizontal);
    push_pairs(fm.columns(), Axis::Vertical);
    jobs
}

/// Z sample frames: `z_samples` frames centered on the middle of the stack
/// with stride `z_stride`, clipped to the stack. Falls back to the central
/// frame if clipping removes every sample.
fn z_frames(nfrms: u32, z_samples: u32, z_stride: u32) -> Vec<u32> {
    if nfrms == 0 {
        return Vec::new();
    }
    let n = z_samples.max(1) as i64;
    let stride = z_stride.max(1) as i64;
    let central = (nfrms / 2) as i64;
    let start = central - (n / 2) * stride + if n % 2 == 1 { 0 } else { stride / 2 };

    let mut frames: Vec<u32> = (0..n)
        .map(|i| start + i * stride)
        .filter(|&z| z >= 0 && z < nfrms as i64)
        .map(|z| z as u32)
        .collect();
    if frames.is_empty() {
        frames.push(central as u32);
    }
    frames
}

/// Collapse per-Z samples into one shift per pair: best score, or the
/// score-weighted average when `average` is set.
fn aggregate(samples: Vec<SampleShift>, average: bool) -> Vec<PairShift> {
    let mut groups: BTreeMap<(usize, usize, Axis), Vec<SampleShift>> = BTreeMap::new();
    for s in samples {
        groups.entry((s.a, s.b, s.axis)).or_default().push(s);
    }

    groups
        .into_iter()
        .map(|((a, b, axis), group)| {
            if average && group.len() > 1 {
                let mut wsum = 0.0f64;
                let mut acc = [0.0f64; 4];
                for s in &group {
                    let w = (s.score as f64).max(0.0) + 1e-6;
                    wsum += w;
                    acc[0] += w * s.dx as f64;
                    acc[1] += w * s.dy as f64;
                    acc[2] += w * s.dz as f64;
                    acc[3] += w * s.score as f64;
                }
                PairShift {
                    a,
                    b,
                    axis,
                    dx: (acc[0] / wsum) as f32,
                    dy: (acc[1] / wsum) as f32,
                    dz: (acc[2] / wsum) as f32,
                    score: (acc[3] / wsum) as f32,
                }
            } else {
                let best = group
                    .iter()
                    .max_by(|x, y| x.score.total_cmp(&y.score))
                    .copied()
                    .unwrap_or(group[0]);
                PairShift {
                    a,
                    b,
                    axis,
                    dx: best.dx,
                    dy: best.dy,
                    dz: best.dz,
                    score: best.score,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filematrix::TileEntry;

    fn tile(x: i64, y: i64) -> TileEntry {
        TileEntry {
            x,
            y,
            z: 0,
            filename: PathBuf::from(format!("{x}_{y}.png")),
            nfrms: 1,
            xsize: 100,
            ysize: 80,
        }
    }

    #[test]
    fn jobs_cover_both_axes_of_a_grid() {
        let fm = FileMatrix {
            filematrix: vec![tile(0, 0), tile(90, 0), tile(0, 70), tile(90, 70)],
            xcorr: Vec::new(),
        };
        let jobs = enumerate_jobs(&fm, &AlignParams::default());
        // 2 horizontal + 2 vertical pairs, one Z sample each.
        assert_eq!(jobs.len(), 4);
        let horizontal = jobs.iter().filter(|j| j.axis == Axis::Horizontal).count();
        assert_eq!(horizontal, 2);
    }

    #[test]
    fn z_sampling_centers_on_the_stack() {
        assert_eq!(z_frames(1, 1, 200), vec![0]);
        assert_eq!(z_frames(100, 1, 10), vec![50]);
        assert_eq!(z_frames(100, 3, 10), vec![40, 50, 60]);
        // Even sample count straddles the center.
        assert_eq!(z_frames(100, 2, 10), vec![45, 55]);
        // Samples falling outside the stack are clipped.
        assert_eq!(z_frames(5, 3, 10), vec![2]);
    }

    #[test]
    fn aggregate_takes_best_score_by_default() {
        let samples = vec![
            SampleShift {
                a: 0,
                b: 1,
                axis: Axis::Vertical,
                dx: 1.0,
                dy: 60.0,
                dz: -1.0,
                score: 0.4,
            },
            SampleShift {
                a: 0,
                b: 1,
                axis: Axis::Vertical,
                dx: 2.0,
                dy: 62.0,
                dz: 0.0,
                score: 0.9,
            },
        ];

        let best = aggregate(samples.clone(), false);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].dy, 62.0);
        assert_eq!(best[0].score, 0.9);

        let avg = aggregate(samples, true);
        assert_eq!(avg.len(), 1);
        assert!(avg[0].dy > 60.0 && avg[0].dy < 62.0, "dy {}", avg[0].dy);
        // Weighted toward the stronger sample.
        assert!(avg[0].dy > 61.0, "dy {}", avg[0].dy);
    }

    #[test]
    fn strip_search_rejects_unusable_geometry() {
        let a = Patch::new(50, 40);
        let b = Patch::new(50, 40);
        // Overlap not larger than the along-axis bound.
        assert!(strip_search(&a, &b, 10, 10, 2).is_none());
        // Overlap taller than the frame.
        assert!(strip_search(&a, &b, 41, 5, 2).is_none());
        // Lateral bound eats the whole template width.
        assert!(strip_search(&a, &b, 20, 5, 25).is_none());
    }
}
