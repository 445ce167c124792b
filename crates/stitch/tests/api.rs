use std::path::Path;

use image::{GrayImage, Luma};
use stitch::app::{self, JobMode, StitchConfig};
use stitch::mosaic::{self, BlendMode, Rect};
use stitch::placement::Solver;
use stitch::runner::Runner;
use stitch::{AlignParams, FileMatrix};

/// Deterministic white-noise texture. Registration needs aperiodic content
/// for an unambiguous correlation peak.
fn noise_image(w: u32, h: u32) -> GrayImage {
    let mut img = GrayImage::new(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let mut v = x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503);
        v ^= v >> 13;
        px[0] = (v % 251) as u8;
    }
    img
}

const TILE_W: u32 = 120;
const TILE_H: u32 = 100;

/// Nominal grid step and the per-tile jitter the pipeline must recover.
/// Row-major: (nominal stage x, nominal stage y, true origin x, true origin y).
const LAYOUT: [(i64, i64, i64, i64); 4] = [
    (0, 0, 0, 0),
    (100, 0, 103, 1),
    (0, 80, 2, 84),
    (100, 80, 104, 82),
];

/// Cut jittered tiles out of a shared base image and name them by their
/// nominal stage coordinates.
fn write_tile_grid(dir: &Path, base: &GrayImage) {
    for (sx, sy, ox, oy) in LAYOUT {
        let mut tile = GrayImage::new(TILE_W, TILE_H);
        for (x, y, px) in tile.enumerate_pixels_mut() {
            *px = *base.get_pixel(ox as u32 + x, oy as u32 + y);
        }
        tile.save(dir.join(format!("{sx}_{sy}.png"))).unwrap();
    }
}

fn test_params() -> AlignParams {
    AlignParams {
        max_dx: 6,
        max_dy: 10,
        max_dz: 0,
        overlap_h: 25,
        overlap_v: 25,
        z_samples: 1,
        z_stride: 1,
        compute_average: false,
    }
}

#[test]
fn full_pipeline_recovers_known_layout() {
    let dir = tempfile::tempdir().unwrap();
    let base = noise_image(350, 300);
    write_tile_grid(dir.path(), &base);

    let fm = FileMatrix::open(dir.path(), 1.0).unwrap();
    assert_eq!(fm.len(), 4);
    assert_eq!(fm.filematrix[0].xsize, TILE_W);
    assert_eq!(fm.filematrix[0].ysize, TILE_H);

    for solver in [
        Solver::Cholesky,
        Solver::ConjugateGradient,
        Solver::GaussSeidel,
    ] {
        let runner = Runner::new()
            .with_params(test_params())
            .with_solver(solver)
            .with_return_fm(true);
        let aligned = runner.run_matrix(&fm).unwrap();

        // 2 horizontal + 2 vertical pairs, all registered on exact copies.
        assert_eq!(aligned.xcorr.len(), 4);
        for rec in &aligned.xcorr {
            assert!(rec.score > 0.99, "weak match: {rec:?}");
        }

        let got: Vec<(i64, i64)> = aligned.filematrix.iter().map(|t| (t.x, t.y)).collect();
        let want: Vec<(i64, i64)> = LAYOUT.iter().map(|&(_, _, ox, oy)| (ox, oy)).collect();
        assert_eq!(got, want, "{solver} positions");
    }
}

#[test]
fn fused_mosaic_reproduces_single_coverage_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let base = noise_image(350, 300);
    write_tile_grid(dir.path(), &base);

    let fm = FileMatrix::open(dir.path(), 1.0).unwrap();
    let aligned = Runner::new()
        .with_params(test_params())
        .with_return_fm(true)
        .run_matrix(&fm)
        .unwrap();

    let img = mosaic::fuse(&aligned, BlendMode::Feather).unwrap();
    assert_eq!((img.width(), img.height()), (224, 184));

    // Points covered by exactly one tile come back unchanged.
    for (cx, cy) in [(30u32, 30u32), (200, 150)] {
        let want = base.get_pixel(cx, cy)[0];
        let got = img.get_pixel(cx, cy)[0];
        assert!(
            (got as i32 - want as i32).abs() <= 1,
            "({cx},{cy}): {got} vs {want}"
        );
    }

    // A window render matches the same region of the full mosaic.
    let window = Rect {
        x: 20,
        y: 20,
        w: 50,
        h: 40,
    };
    let region = mosaic::fuse_region(&aligned, window, BlendMode::First).unwrap();
    let full = mosaic::fuse(&aligned, BlendMode::First).unwrap();
    for y in 0..40u32 {
        for x in 0..50u32 {
            assert_eq!(region.get_pixel(x, y), full.get_pixel(x + 20, y + 20));
        }
    }
}

#[test]
fn output_yaml_gated_by_return_fm() {
    let dir = tempfile::tempdir().unwrap();
    let base = noise_image(350, 300);
    write_tile_grid(dir.path(), &base);

    let out = dir.path().join("aligned.yaml");
    let runner = Runner::new()
        .with_params(test_params())
        .with_output_file(&out);

    runner.run(dir.path(), 1.0).unwrap();
    assert!(out.exists());

    let reloaded = FileMatrix::load_yaml(&out).unwrap();
    assert_eq!(reloaded.len(), 4);
    assert_eq!(reloaded.xcorr.len(), 4);

    // With return_fm the caller keeps the matrix and no file is written.
    let out2 = dir.path().join("skipped.yaml");
    let aligned = runner
        .clone()
        .with_output_file(&out2)
        .with_return_fm(true)
        .run(dir.path(), 1.0)
        .unwrap();
    assert!(!out2.exists());
    assert_eq!(aligned.len(), 4);
}

#[test]
fn manifest_job_writes_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let base = noise_image(350, 300);
    write_tile_grid(dir.path(), &base);

    let cfg = StitchConfig {
        input: dir.path().to_path_buf(),
        mode: Some(JobMode::Manifest),
        ratio_px_um: Some(1.0),
        channel: None,
        solver: None,
        max_dx: None,
        max_dy: None,
        max_dz: None,
        overlap_h: None,
        overlap_v: None,
        z_samples: None,
        z_stride: None,
        compute_average: None,
        return_fm: None,
        output_yaml: None,
        output_png: None,
        blend: None,
        log_level: Some("off".to_owned()),
    };
    app::run_job(&cfg).unwrap();

    let manifest = dir.path().join(app::DEFAULT_MANIFEST_NAME);
    assert!(manifest.exists());
    let fm = FileMatrix::load_yaml(&manifest).unwrap();
    assert_eq!(fm.len(), 4);
}
