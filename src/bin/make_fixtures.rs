//! make_fixtures - write the sample base/present image sequences
//!
//! Produces `<out>/base/`, `<out>/present/`, `<out>/labels.json` and a
//! `<out>/roadcompare.toml` that declares the sequences' 1 fps timing.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use roadcompare::fixtures::{sample_labels, sample_passes, write_sequence, SAMPLE_FRAMES};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "sample_data")]
    out: PathBuf,
    /// Frames per pass.
    #[arg(long, default_value_t = SAMPLE_FRAMES)]
    frames: usize,
}

const SAMPLE_CONFIG: &str = "[sampling]\nsample_rate = 1.0\nsequence_fps = 1.0\n";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (base, present) = sample_passes(args.frames);
    write_sequence(&args.out.join("base"), &base)?;
    write_sequence(&args.out.join("present"), &present)?;

    let labels_path = args.out.join("labels.json");
    fs::write(&labels_path, serde_json::to_vec_pretty(&sample_labels())?)
        .with_context(|| format!("failed to write {}", labels_path.display()))?;
    let config_path = args.out.join("roadcompare.toml");
    fs::write(&config_path, SAMPLE_CONFIG)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    log::info!(
        "make_fixtures: {} frames per pass written to {}",
        args.frames,
        args.out.display()
    );
    log::info!(
        "run: ROADCOMPARE_CONFIG={} roadcompare --base {} --present {}",
        config_path.display(),
        args.out.join("base").display(),
        args.out.join("present").display()
    );
    Ok(())
}
