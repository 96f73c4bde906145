//! evaluate - precision/recall of a results file against ground-truth labels

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use roadcompare::evaluate::{evaluate, load_issues, load_labels};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Ground-truth labels: JSON array of {element, issue_type}.
    #[arg(long)]
    labels: PathBuf,
    /// Results JSON written by roadcompare.
    #[arg(long, default_value = "results.json")]
    results: PathBuf,
    #[arg(long, default_value = "metrics.json")]
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let labels = load_labels(&args.labels)?;
    let issues = load_issues(&args.results)?;
    let metrics = evaluate(&issues, &labels);

    log::info!(
        "evaluate: precision={} recall={} tp={} fp={} fn={}",
        metrics.precision,
        metrics.recall,
        metrics.tp,
        metrics.fp,
        metrics.fn_
    );
    let json = serde_json::to_vec_pretty(&metrics)?;
    std::fs::write(&args.out, json).with_context(|| format!("failed to write {}", args.out.display()))?;
    println!("{}", serde_json::to_string(&metrics)?);
    Ok(())
}
