use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use stitch::app::{self, StitchConfig};
use stitch::mosaic::{self, BlendMode};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let first = args.next().expect(
        "usage: stitch_folder <input|--config FILE> [--ratio R] [--channel r|g|b] \
         [--solver NAME] [--overlap-h N] [--overlap-v N] [--mx N] [--my N] [--average] \
         [--blend feather|first] [--out-yaml FILE] [--out-png FILE] [--return-fm]",
    );

    let mut cfg = if first == "--config" {
        let path: PathBuf = args.next().context("expected a path after --config")?.into();
        app::load_config(&path)?
    } else {
        StitchConfig {
            input: first.into(),
            mode: None,
            ratio_px_um: None,
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
            log_level: None,
        }
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ratio" => {
                let v = args.next().context("expected a value after --ratio")?;
                cfg.ratio_px_um = Some(v.parse().context("could not parse ratio")?);
            }
            "--channel" => {
                cfg.channel = Some(args.next().context("expected r|g|b after --channel")?);
            }
            "--solver" => {
                cfg.solver = Some(args.next().context("expected a name after --solver")?);
            }
            "--overlap-h" => {
                let v = args.next().context("expected a value after --overlap-h")?;
                cfg.overlap_h = Some(v.parse().context("could not parse overlap")?);
            }
            "--overlap-v" => {
                let v = args.next().context("expected a value after --overlap-v")?;
                cfg.overlap_v = Some(v.parse().context("could not parse overlap")?);
            }
            "--mx" => {
                let v = args.next().context("expected a value after --mx")?;
                cfg.max_dx = Some(v.parse().context("could not parse --mx")?);
            }
            "--my" => {
                let v = args.next().context("expected a value after --my")?;
                cfg.max_dy = Some(v.parse().context("could not parse --my")?);
            }
            "--average" => cfg.compute_average = Some(true),
            "--blend" => {
                cfg.blend = Some(args.next().context("expected feather|first after --blend")?);
            }
            "--out-yaml" => {
                cfg.output_yaml = Some(args.next().context("expected a path")?.into());
            }
            "--out-png" => {
                cfg.output_png = Some(args.next().context("expected a path")?.into());
            }
            "--return-fm" => cfg.return_fm = Some(true),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    stitch::logger::init_from_env();

    let runner = app::build_runner(&cfg)?;
    let ratio = cfg.ratio_px_um.unwrap_or(1.0);

    let align_started = Instant::now();
    let aligned = runner.run(&cfg.input, ratio)?;
    let align_ms = align_started.elapsed().as_secs_f64() * 1000.0;

    println!("{} tiles aligned", aligned.len());
    println!("align: {align_ms:5.2} ms");
    for rec in &aligned.xcorr {
        println!(
            " - {:?} {} ~ {}: dx {:+.1} dy {:+.1} dz {:+.0} (score {:.3})",
            rec.axis,
            rec.aname.display(),
            rec.bname.display(),
            rec.dx,
            rec.dy,
            rec.dz,
            rec.score
        );
    }

    let blend = match cfg.blend.as_deref() {
        Some(s) => s.parse::<BlendMode>().map_err(anyhow::Error::msg)?,
        None => BlendMode::default(),
    };

    let fuse_started = Instant::now();
    let img = mosaic::fuse(&aligned, blend)?;
    let fuse_ms = fuse_started.elapsed().as_secs_f64() * 1000.0;
    println!("fuse:  {fuse_ms:5.2} ms ({}x{} mosaic)", img.width(), img.height());

    let out = cfg
        .output_png
        .unwrap_or_else(|| cfg.input.with_extension("mosaic.png"));
    img.save(&out)?;
    println!("Saved mosaic to {}", out.display());

    Ok(())
}
