use std::path::PathBuf;

use anyhow::Context;
use stitch::app::DEFAULT_MANIFEST_NAME;
use stitch::FileMatrix;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let folder: PathBuf = args
        .next()
        .expect("usage: make_manifest <tile-folder> [--ratio R] [--out FILE]")
        .into();

    let mut ratio = 1.0f64;
    let mut out: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ratio" => {
                let v = args.next().context("expected a value after --ratio")?;
                ratio = v
                    .parse()
                    .context("could not parse ratio (pixels per micrometer)")?;
                if ratio <= 0.0 {
                    anyhow::bail!("ratio must be > 0");
                }
            }
            "--out" => {
                out = Some(args.next().context("expected a path after --out")?.into());
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let fm = FileMatrix::scan_folder(&folder, ratio)
        .with_context(|| format!("scanning {}", folder.display()))?;

    let out = out.unwrap_or_else(|| folder.join(DEFAULT_MANIFEST_NAME));
    fm.save_yaml(&out)?;

    println!("{} tiles (ratio {ratio} px/um)", fm.len());
    println!("Saved manifest to {}", out.display());
    Ok(())
}
