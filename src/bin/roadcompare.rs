//! roadcompare - compare a base and a present pass of the same road segment
//!
//! Runs one change-detection job and writes the result (issues plus job
//! summary) as JSON. Ctrl-C cancels the job between frame pairs.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use roadcompare::{CancelToken, ChangePipeline, DetectorKind, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Base (earlier) pass: video file or image-sequence directory.
    #[arg(long)]
    base: String,
    /// Present (later) pass.
    #[arg(long)]
    present: String,
    /// Frames per second to sample from each pass.
    #[arg(long)]
    sample_rate: Option<f64>,
    /// Detections a track needs before it can produce an issue.
    #[arg(long)]
    persist_n: Option<usize>,
    /// Detector backend: heuristic or neural.
    #[arg(long, env = "ROADCOMPARE_DETECTOR")]
    detector: Option<String>,
    /// ONNX model for the neural backend.
    #[arg(long, env = "ROADCOMPARE_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Directory evidence crops are written to.
    #[arg(long, env = "ROADCOMPARE_BLOB_ROOT")]
    blob_root: Option<PathBuf>,
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "ROADCOMPARE_CONFIG")]
    config: Option<PathBuf>,
    /// Output path for the job result.
    #[arg(long, default_value = "results.json")]
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::load()?,
    };
    if let Some(detector) = &args.detector {
        config.detector.backend = detector.parse::<DetectorKind>()?;
    }
    if let Some(model) = &args.model {
        config.detector.model_path = Some(model.clone());
    }
    if let Some(root) = &args.blob_root {
        config.evidence.blob_root = root.clone();
    }
    let sample_rate = args.sample_rate.unwrap_or(config.sampling.sample_rate);
    let persist_n = args.persist_n.unwrap_or(config.tracker.persist_n);

    let pipeline = ChangePipeline::from_config(config)?;
    log::info!(
        "roadcompare: detector={} evidence={}",
        pipeline.detector_name(),
        pipeline.config().evidence.blob_root.display()
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("roadcompare: interrupt received, cancelling job");
        handler_token.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let result = pipeline.run_with_cancel(&args.base, &args.present, sample_rate, persist_n, &cancel)?;

    let json = serde_json::to_vec_pretty(&result)?;
    std::fs::write(&args.out, json).with_context(|| format!("failed to write {}", args.out.display()))?;
    log::info!(
        "roadcompare: {} issues over {} frame pairs written to {}",
        result.issues.len(),
        result.processed_frame_count,
        args.out.display()
    );
    for (severity, count) in &result.summary.by_severity {
        log::info!("  {}: {}", severity.as_str(), count);
    }
    Ok(())
}
