use std::sync::Arc;

use image::{Rgb, RgbImage};

use roadcompare::fixtures::{
    lane_box, render_scene, sample_labels, sample_passes, write_sequence, LaneStyle, MemoryOpener, SceneSpec,
    ScriptedDetector, SAMPLE_FRAMES, SIGN_FRAMES,
};
use roadcompare::{
    evaluate, BBox, CancelToken, ChangeClass, ChangePipeline, ElementType, FilesystemBlobSink,
    HeuristicDetector, LocalOpener, MemoryBlobSink, PipelineConfig, PipelineError, Severity,
};

const BASE: &str = "mem://base";
const PRESENT: &str = "mem://present";

/// Blur gate, enhancement and alignment off: scripted tests only exercise
/// tracking, classification and assembly.
fn scripted_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.quality.blur_threshold = 0.0;
    cfg.quality.enhance = false;
    cfg.alignment.enabled = false;
    cfg
}

fn blank_frames(count: usize) -> Vec<RgbImage> {
    vec![RgbImage::from_pixel(160, 90, Rgb([70, 70, 70])); count]
}

fn opener(base: Vec<RgbImage>, present: Vec<RgbImage>) -> Arc<MemoryOpener> {
    let mut opener = MemoryOpener::new();
    opener.insert(BASE, base, 1.0);
    opener.insert(PRESENT, present, 1.0);
    Arc::new(opener)
}

fn sign() -> BBox {
    BBox::new(50.0, 30.0, 65.0, 45.0)
}

#[test]
fn sign_missing_from_present_pass_is_one_high_issue() -> anyhow::Result<()> {
    let mut detector = ScriptedDetector::new();
    detector.add_span(BASE, 0..40, ElementType::SignBoard, sign(), 0.9);
    let sink = Arc::new(MemoryBlobSink::new());
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(60), blank_frames(60)),
        Arc::new(detector),
        sink.clone(),
    );

    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;

    assert_eq!(result.processed_frame_count, 60);
    assert_eq!(result.issues.len(), 1);
    let issue = &result.issues[0];
    assert_eq!(issue.element, ElementType::SignBoard);
    assert_eq!(issue.issue_type, ChangeClass::Missing);
    assert_eq!(issue.severity, Severity::High);
    assert!(issue.first_frame <= 39);
    assert!(issue.first_frame <= issue.last_frame);
    assert!(issue.base_crop.is_some());
    assert!(!sink.is_empty());
    assert_eq!(result.summary.by_severity.get(&Severity::High), Some(&1));
    assert_eq!(result.summary.detector, "scripted");
    Ok(())
}

#[test]
fn single_frame_detection_never_becomes_an_issue() -> anyhow::Result<()> {
    let mut detector = ScriptedDetector::new();
    detector.add(PRESENT, 10, ElementType::RoadsideHazard, BBox::new(20.0, 60.0, 40.0, 80.0), 0.99);
    detector.add(BASE, 20, ElementType::SignBoard, sign(), 0.99);
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(30), blank_frames(30)),
        Arc::new(detector),
        Arc::new(MemoryBlobSink::new()),
    );

    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;
    assert!(result.issues.is_empty());
    assert_eq!(result.summary.discarded_tracks, 2);
    Ok(())
}

#[test]
fn worn_lane_marking_is_faded_not_unchanged() -> anyhow::Result<()> {
    let scene = |lane| {
        render_scene(&SceneSpec {
            sign: false,
            lane,
            ..SceneSpec::default()
        })
    };
    let mut detector = ScriptedDetector::new();
    detector.add_span(BASE, 0..6, ElementType::LaneMarking, lane_box(), 0.9);
    detector.add_span(PRESENT, 0..6, ElementType::LaneMarking, lane_box(), 0.9);
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(vec![scene(LaneStyle::Solid); 6], vec![scene(LaneStyle::Faded); 6]),
        Arc::new(detector),
        Arc::new(MemoryBlobSink::new()),
    );

    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].element, ElementType::LaneMarking);
    assert_eq!(result.issues[0].issue_type, ChangeClass::Faded);
    assert_eq!(result.issues[0].severity, Severity::High);
    assert!(result.issues[0].present_crop.is_some());
    Ok(())
}

#[test]
fn identical_passes_report_nothing() -> anyhow::Result<()> {
    let frames = vec![render_scene(&SceneSpec::default()); 4];
    let cfg = PipelineConfig::default();
    let pipeline = ChangePipeline::new(
        cfg.clone(),
        opener(frames.clone(), frames),
        Arc::new(HeuristicDetector::new(cfg.detector)),
        Arc::new(MemoryBlobSink::new()),
    );

    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;
    assert_eq!(result.processed_frame_count, 4);
    // Sign and lane marking confirmed on both sides, then matched as unchanged.
    assert!(result.summary.base_tracks >= 2, "{:?}", result.summary);
    assert_eq!(result.summary.present_tracks, result.summary.base_tracks);
    assert!(result.issues.is_empty(), "unexpected issues: {:?}", result.issues);
    assert_eq!(result.summary.detector, "heuristic");
    Ok(())
}

#[test]
fn sample_job_with_default_settings_finds_exactly_the_labelled_changes() -> anyhow::Result<()> {
    let (base, present) = sample_passes(SAMPLE_FRAMES);
    let cfg = PipelineConfig::default();
    let pipeline = ChangePipeline::new(
        cfg.clone(),
        opener(base, present),
        Arc::new(HeuristicDetector::new(cfg.detector)),
        Arc::new(MemoryBlobSink::new()),
    );

    let result = pipeline.run(BASE, PRESENT, cfg.sampling.sample_rate, cfg.tracker.persist_n)?;
    assert_eq!(result.processed_frame_count, SAMPLE_FRAMES);
    assert_eq!(result.summary.base_reader.accepted, SAMPLE_FRAMES as u64);
    assert!(result.summary.base_tracks >= 2, "{:?}", result.summary);
    assert!(result.summary.present_tracks >= 1, "{:?}", result.summary);

    let metrics = evaluate(&result.issues, &sample_labels());
    assert_eq!(metrics.precision, 1.0, "issues: {:?}", result.issues);
    assert_eq!(metrics.recall, 1.0, "issues: {:?}", result.issues);

    let sign = result
        .issues
        .iter()
        .find(|i| i.element == ElementType::SignBoard)
        .ok_or_else(|| anyhow::anyhow!("no sign issue"))?;
    assert_eq!(sign.issue_type, ChangeClass::Missing);
    assert_eq!(sign.severity, Severity::High);
    assert!(sign.first_frame < SIGN_FRAMES as u32);
    let lane = result
        .issues
        .iter()
        .find(|i| i.element == ElementType::LaneMarking)
        .ok_or_else(|| anyhow::anyhow!("no lane issue"))?;
    assert_eq!(lane.issue_type, ChangeClass::Faded);
    assert_eq!(lane.severity, Severity::High);
    Ok(())
}

#[test]
fn configured_pipeline_reads_image_sequences_from_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (base, present) = sample_passes(6);
    write_sequence(&dir.path().join("base"), &base)?;
    write_sequence(&dir.path().join("present"), &present)?;

    let mut cfg = PipelineConfig::default();
    cfg.sampling.sequence_fps = 1.0;
    cfg.evidence.blob_root = dir.path().join("evidence");
    let pipeline = ChangePipeline::from_config(cfg)?;
    assert_eq!(pipeline.detector_name(), "heuristic");

    let base_dir = dir.path().join("base");
    let present_dir = dir.path().join("present");
    let result = pipeline.run(
        &base_dir.to_string_lossy(),
        &present_dir.to_string_lossy(),
        1.0,
        3,
    )?;
    assert_eq!(result.processed_frame_count, 6);
    let lane = result
        .issues
        .iter()
        .find(|i| i.element == ElementType::LaneMarking)
        .ok_or_else(|| anyhow::anyhow!("no lane issue in {:?}", result.issues))?;
    assert_eq!(lane.issue_type, ChangeClass::Faded);
    let crop = lane.base_crop.clone().unwrap_or_default();
    assert!(std::path::Path::new(&crop).starts_with(dir.path().join("evidence")));
    Ok(())
}

#[test]
fn detector_failure_on_one_frame_is_absorbed() -> anyhow::Result<()> {
    let mut detector = ScriptedDetector::new();
    detector.add_span(BASE, 0..40, ElementType::Guardrail, sign(), 0.9);
    detector.fail_on(BASE, 5);
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(40), blank_frames(40)),
        Arc::new(detector),
        Arc::new(MemoryBlobSink::new()),
    );

    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;
    assert_eq!(result.summary.detector_failures, 1);
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].issue_type, ChangeClass::Missing);
    Ok(())
}

#[test]
fn shorter_pass_bounds_processed_frames() -> anyhow::Result<()> {
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(10), blank_frames(8)),
        Arc::new(ScriptedDetector::new()),
        Arc::new(MemoryBlobSink::new()),
    );
    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;
    assert_eq!(result.processed_frame_count, 8);
    assert_eq!(result.summary.base_reader.accepted, 10);
    Ok(())
}

#[test]
fn unreadable_source_is_a_typed_error() {
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(5), blank_frames(5)),
        Arc::new(ScriptedDetector::new()),
        Arc::new(MemoryBlobSink::new()),
    );
    assert!(matches!(
        pipeline.run(BASE, "mem://nowhere", 1.0, 3),
        Err(PipelineError::SourceUnreadable { .. })
    ));

    let local = ChangePipeline::new(
        scripted_config(),
        Arc::new(LocalOpener::default()),
        Arc::new(ScriptedDetector::new()),
        Arc::new(MemoryBlobSink::new()),
    );
    assert!(matches!(
        local.run("/nonexistent/base.mp4", "/nonexistent/present.mp4", 1.0, 3),
        Err(PipelineError::SourceUnreadable { .. })
    ));
}

#[test]
fn cancelled_job_fails_with_cancelled() {
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(5), blank_frames(5)),
        Arc::new(ScriptedDetector::new()),
        Arc::new(MemoryBlobSink::new()),
    );
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(
        pipeline.run_with_cancel(BASE, PRESENT, 1.0, 3, &cancel),
        Err(PipelineError::Cancelled { completed: 0 })
    ));
}

#[test]
fn evidence_lands_in_filesystem_sink_and_result_serializes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut detector = ScriptedDetector::new();
    detector.add_span(BASE, 0..10, ElementType::Divider, sign(), 0.9);
    let pipeline = ChangePipeline::new(
        scripted_config(),
        opener(blank_frames(10), blank_frames(10)),
        Arc::new(detector),
        Arc::new(FilesystemBlobSink::new(dir.path())?),
    );

    let result = pipeline.run(BASE, PRESENT, 1.0, 3)?;
    let crop = result.issues[0].base_crop.clone().unwrap_or_default();
    assert!(std::path::Path::new(&crop).starts_with(dir.path()));
    assert!(image::open(&crop).is_ok());

    let json = serde_json::to_value(&result)?;
    assert_eq!(json["processed_frame_count"], 10);
    assert_eq!(json["issues"][0]["element"], "divider");
    assert_eq!(json["issues"][0]["issue_type"], "missing");
    assert!(json["runtime"].is_f64());
    assert_eq!(json["summary"]["by_severity"]["HIGH"], 1);
    Ok(())
}
