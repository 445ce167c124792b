//! Cut a source image into an overlapping, jittered tile grid.
//!
//! Output files are named `{x}_{y}.png` in stage coordinates, the naming
//! convention the manifest scanner expects. The true cut positions are
//! written to `truth.json` so registration output can be checked against
//! ground truth. Without `--image` a white-noise texture is synthesized.

use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{GrayImage, ImageReader};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

#[derive(Serialize)]
struct TruthEntry {
    file: String,
    true_x: i64,
    true_y: i64,
}

struct Opts {
    out_dir: PathBuf,
    image: Option<PathBuf>,
    cols: u32,
    rows: u32,
    tile_w: u32,
    tile_h: u32,
    overlap: u32,
    jitter: u32,
    seed: u64,
    ratio: f64,
}

fn parse_opts() -> anyhow::Result<Opts> {
    let mut args = std::env::args().skip(1);
    let out_dir: PathBuf = args
        .next()
        .expect(
            "usage: gen-tiles <out-dir> [--image FILE] [--cols N] [--rows N] \
             [--tile WxH] [--overlap N] [--jitter N] [--seed N] [--ratio R]",
        )
        .into();

    let mut opts = Opts {
        out_dir,
        image: None,
        cols: 3,
        rows: 3,
        tile_w: 256,
        tile_h: 256,
        overlap: 48,
        jitter: 8,
        seed: 7,
        ratio: 1.0,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--image" => opts.image = Some(args.next().context("expected a path")?.into()),
            "--cols" => opts.cols = parse(&mut args, "--cols")?,
            "--rows" => opts.rows = parse(&mut args, "--rows")?,
            "--tile" => {
                let v = args.next().context("expected WxH after --tile")?;
                let (w, h) = v
                    .split_once('x')
                    .context("tile size must look like 256x256")?;
                opts.tile_w = w.parse().context("could not parse tile width")?;
                opts.tile_h = h.parse().context("could not parse tile height")?;
            }
            "--overlap" => opts.overlap = parse(&mut args, "--overlap")?,
            "--jitter" => opts.jitter = parse(&mut args, "--jitter")?,
            "--seed" => opts.seed = parse(&mut args, "--seed")?,
            "--ratio" => {
                let v = args.next().context("expected a value after --ratio")?;
                opts.ratio = v.parse().context("could not parse ratio")?;
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    if opts.cols == 0 || opts.rows == 0 {
        anyhow::bail!("grid must have at least one row and one column");
    }
    if opts.overlap >= opts.tile_w || opts.overlap >= opts.tile_h {
        anyhow::bail!("overlap must be smaller than the tile size");
    }
    if opts.ratio <= 0.0 {
        anyhow::bail!("ratio must be > 0");
    }
    Ok(opts)
}

fn parse<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let v = args
        .next()
        .with_context(|| format!("expected a value after {flag}"))?;
    v.parse().with_context(|| format!("could not parse {flag}"))
}

fn noise_image(w: u32, h: u32, seed: u64) -> GrayImage {
    let mut img = GrayImage::new(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let mut v = x
            .wrapping_mul(2654435761)
            .wrapping_add(seed as u32)
            ^ y.wrapping_mul(40503);
        v ^= v >> 13;
        px[0] = (v % 251) as u8;
    }
    img
}

fn load_base(opts: &Opts) -> anyhow::Result<GrayImage> {
    let step_x = opts.tile_w - opts.overlap;
    let step_y = opts.tile_h - opts.overlap;
    let need_w = (opts.cols - 1) * step_x + opts.tile_w + opts.jitter + 1;
    let need_h = (opts.rows - 1) * step_y + opts.tile_h + opts.jitter + 1;

    match &opts.image {
        Some(path) => {
            let img = ImageReader::open(path)
                .with_context(|| format!("opening {}", path.display()))?
                .decode()?
                .to_luma8();
            if img.width() < need_w || img.height() < need_h {
                anyhow::bail!(
                    "image {}x{} too small for this grid (need {need_w}x{need_h})",
                    img.width(),
                    img.height()
                );
            }
            Ok(img)
        }
        None => Ok(noise_image(need_w, need_h, opts.seed)),
    }
}

fn cut_tile(base: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
    let mut tile = GrayImage::new(w, h);
    for (x, y, px) in tile.enumerate_pixels_mut() {
        *px = *base.get_pixel(x0 + x, y0 + y);
    }
    tile
}

fn main() -> anyhow::Result<()> {
    let opts = parse_opts()?;
    let base = load_base(&opts)?;
    std::fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("creating {}", opts.out_dir.display()))?;

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let step_x = opts.tile_w - opts.overlap;
    let step_y = opts.tile_h - opts.overlap;

    let mut truth = Vec::new();
    for row in 0..opts.rows {
        for col in 0..opts.cols {
            let nominal_x = (col * step_x) as i64;
            let nominal_y = (row * step_y) as i64;

            // First tile stays at the origin so positions keep a zero anchor.
            let (jx, jy) = if row == 0 && col == 0 {
                (0, 0)
            } else {
                (
                    rng.gen_range(0..=opts.jitter) as i64,
                    rng.gen_range(0..=opts.jitter) as i64,
                )
            };
            let true_x = nominal_x + jx;
            let true_y = nominal_y + jy;

            let tile = cut_tile(
                &base,
                true_x as u32,
                true_y as u32,
                opts.tile_w,
                opts.tile_h,
            );

            // Stage coordinates are micrometers; divide the nominal pixel
            // position by the calibration ratio.
            let stage_x = (nominal_x as f64 / opts.ratio).round() as i64;
            let stage_y = (nominal_y as f64 / opts.ratio).round() as i64;
            let name = format!("{stage_x}_{stage_y}.png");
            tile.save(opts.out_dir.join(&name))?;

            println!("{name}: true position ({true_x}, {true_y})");
            truth.push(TruthEntry {
                file: name,
                true_x,
                true_y,
            });
        }
    }

    let truth_path = opts.out_dir.join("truth.json");
    write_truth(&truth_path, &truth)?;
    println!(
        "{} tiles ({}x{} grid) -> {}",
        truth.len(),
        opts.cols,
        opts.rows,
        opts.out_dir.display()
    );
    Ok(())
}

fn write_truth(path: &Path, truth: &[TruthEntry]) -> anyhow::Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(&mut file, truth)?;
    file.write_all(b"\n")?;
    Ok(())
}
