//! Job orchestration: read both passes, align, detect, track, classify and
//! assemble issues.
//!
//! Only `PipelineError` leaves this module. Alignment, detection and evidence
//! failures are logged and absorbed at their stage.

use image::RgbImage;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::align::{AlignStatus, FrameAligner};
use crate::classify::{ChangeClassifier, CropSource, Pass, Severity};
use crate::config::PipelineConfig;
use crate::detect::{Detection, DetectorRegistry, ElementDetector};
use crate::error::PipelineError;
use crate::evidence::{BlobSink, FilesystemBlobSink};
use crate::frame::Frame;
use crate::ingest::{FrameReader, LocalOpener, ReaderStats, SourceOpener};
use crate::issue::{Issue, IssueAssembler};
use crate::track::DetectionTracker;

/// Cooperative cancellation, checked between frame pairs.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AlignmentCounts {
    pub warped: usize,
    pub identity: usize,
    pub disabled: usize,
    pub failed: usize,
}

impl AlignmentCounts {
    fn record(&mut self, status: &AlignStatus) {
        match status {
            AlignStatus::Warped { .. } => self.warped += 1,
            AlignStatus::Identity => self.identity += 1,
            AlignStatus::Disabled => self.disabled += 1,
            AlignStatus::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct JobSummary {
    pub processed_frames: usize,
    pub total_issues: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub runtime_seconds: f64,
    pub frames_per_second: f64,
    pub detector: String,
    pub base_reader: ReaderStats,
    pub present_reader: ReaderStats,
    pub alignment: AlignmentCounts,
    pub detector_failures: usize,
    pub base_tracks: usize,
    pub present_tracks: usize,
    pub discarded_tracks: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct JobResult {
    pub processed_frame_count: usize,
    pub issues: Vec<Issue>,
    #[serde(serialize_with = "as_seconds")]
    pub runtime: Duration,
    pub summary: JobSummary,
}

fn as_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Frames of one job addressed by pass and accepted-frame index.
struct JobFrames<'a> {
    base: &'a [Frame],
    present: &'a [Frame],
}

impl CropSource for JobFrames<'_> {
    fn frame(&self, pass: Pass, frame_index: u32) -> Option<&RgbImage> {
        let frames = match pass {
            Pass::Base => self.base,
            Pass::Present => self.present,
        };
        frames.get(frame_index as usize).map(Frame::pixels)
    }
}

pub struct ChangePipeline {
    config: PipelineConfig,
    opener: Arc<dyn SourceOpener>,
    detector: Arc<dyn ElementDetector>,
    sink: Arc<dyn BlobSink>,
}

impl ChangePipeline {
    pub fn new(
        config: PipelineConfig,
        opener: Arc<dyn SourceOpener>,
        detector: Arc<dyn ElementDetector>,
        sink: Arc<dyn BlobSink>,
    ) -> Self {
        Self {
            config,
            opener,
            detector,
            sink,
        }
    }

    /// Local-file sources, the configured detector backend and a filesystem
    /// blob sink under `evidence.blob_root`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let registry = DetectorRegistry::from_settings(&config.detector);
        let detector = registry
            .default_detector()
            .ok_or_else(|| PipelineError::InvalidConfig("no detector backend available".into()))?;
        log::info!(
            "ChangePipeline: detectors available {:?}, using {}",
            registry.list(),
            detector.name()
        );
        let sink = FilesystemBlobSink::new(&config.evidence.blob_root)
            .map_err(|e| PipelineError::InvalidConfig(format!("evidence.blob_root: {e}")))?;
        let opener = LocalOpener::new(config.sampling.sequence_fps);
        Ok(Self::new(config, Arc::new(opener), detector, Arc::new(sink)))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn run(
        &self,
        base: &str,
        present: &str,
        sample_rate: f64,
        persist_n: usize,
    ) -> Result<JobResult, PipelineError> {
        self.run_with_cancel(base, present, sample_rate, persist_n, &CancelToken::new())
    }

    pub fn run_with_cancel(
        &self,
        base: &str,
        present: &str,
        sample_rate: f64,
        persist_n: usize,
        cancel: &CancelToken,
    ) -> Result<JobResult, PipelineError> {
        let started = Instant::now();
        let mut config = self.config.clone();
        config.sampling.sample_rate = sample_rate;
        config.tracker.persist_n = persist_n;
        config.validate()?;

        log::info!(
            "ChangePipeline: base={} present={} sample_rate={} persist_n={} detector={}",
            base,
            present,
            sample_rate,
            persist_n,
            self.detector.name()
        );

        let reader = FrameReader::new(config.sampling.clone(), config.quality.clone());
        let base_read = reader.read(self.opener.as_ref(), base)?;
        let present_read = reader.read(self.opener.as_ref(), present)?;
        let processed = base_read.frames.len().min(present_read.frames.len());
        if base_read.frames.len() != present_read.frames.len() {
            log::warn!(
                "ChangePipeline: pass lengths differ (base {}, present {}); comparing first {}",
                base_read.frames.len(),
                present_read.frames.len(),
                processed
            );
        }

        let aligner = FrameAligner::new(config.alignment.clone());
        let mut base_tracker = DetectionTracker::new(config.tracker.clone());
        let mut present_tracker = DetectionTracker::new(config.tracker.clone());
        let mut alignment = AlignmentCounts::default();
        let mut detector_failures = 0usize;
        let base_frames = &base_read.frames[..processed];
        let mut aligned_frames: Vec<Frame> = Vec::with_capacity(processed);

        for (i, base_frame) in base_frames.iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!("ChangePipeline: cancelled after {} frame pairs", i);
                return Err(PipelineError::Cancelled { completed: i });
            }
            let aligned = aligner.align(base_frame, &present_read.frames[i]);
            alignment.record(&aligned.status);
            if let AlignStatus::Failed(e) = &aligned.status {
                log::warn!("ChangePipeline: frame {} unaligned: {}", base_frame.index, e);
            }

            let (base_dets, present_dets) = if config.parallel_detection {
                rayon::join(
                    || self.detect_frame(base_frame, "base"),
                    || self.detect_frame(&aligned.frame, "present"),
                )
            } else {
                (
                    self.detect_frame(base_frame, "base"),
                    self.detect_frame(&aligned.frame, "present"),
                )
            };
            detector_failures += usize::from(base_dets.is_none()) + usize::from(present_dets.is_none());

            let frame_index = base_frame.index;
            for (tracker, dets, pass) in [
                (&mut base_tracker, base_dets, "base"),
                (&mut present_tracker, present_dets, "present"),
            ] {
                if let Err(e) = tracker.observe_frame(frame_index, &dets.unwrap_or_default()) {
                    log::warn!("ChangePipeline: {} detections of frame {} dropped: {}", pass, frame_index, e);
                }
            }
            aligned_frames.push(aligned.frame);
        }

        let base_outcome = base_tracker.finish();
        let present_outcome = present_tracker.finish();
        log::info!(
            "ChangePipeline: {} base and {} present tracks confirmed, {} discarded",
            base_outcome.confirmed.len(),
            present_outcome.confirmed.len(),
            base_outcome.discarded + present_outcome.discarded
        );

        let frames = JobFrames {
            base: base_frames,
            present: &aligned_frames,
        };
        let records = ChangeClassifier::new(config.classifier.clone()).classify(
            &base_outcome.confirmed,
            &present_outcome.confirmed,
            &frames,
        );
        let issues = IssueAssembler::new(&config.evidence, self.sink.as_ref(), persist_n).assemble(&records, &frames);

        let runtime = started.elapsed();
        let mut by_severity = BTreeMap::new();
        for issue in &issues {
            *by_severity.entry(issue.severity).or_insert(0) += 1;
        }
        let secs = runtime.as_secs_f64();
        let summary = JobSummary {
            processed_frames: processed,
            total_issues: issues.len(),
            by_severity,
            runtime_seconds: secs,
            frames_per_second: if secs > 0.0 { processed as f64 / secs } else { 0.0 },
            detector: self.detector.name().to_string(),
            base_reader: base_read.stats,
            present_reader: present_read.stats,
            alignment,
            detector_failures,
            base_tracks: base_outcome.confirmed.len(),
            present_tracks: present_outcome.confirmed.len(),
            discarded_tracks: base_outcome.discarded + present_outcome.discarded,
        };
        log::info!(
            "ChangePipeline: {} frame pairs, {} issues in {:.2}s",
            processed,
            issues.len(),
            secs
        );

        Ok(JobResult {
            processed_frame_count: processed,
            issues,
            runtime,
            summary,
        })
    }

    /// `None` when inference failed; the frame then counts as empty.
    fn detect_frame(&self, frame: &Frame, pass: &str) -> Option<Vec<Detection>> {
        match self.detector.detect(frame) {
            Ok(detections) => Some(detections),
            Err(e) => {
                log::warn!(
                    "ChangePipeline: {} detector failed on {} frame {}: {}",
                    self.detector.name(),
                    pass,
                    frame.index,
                    e
                );
                None
            }
        }
    }
}
