//! Road infrastructure change detection.
//!
//! Compares two video passes over the same road segment (a *base* pass and a
//! *present* pass) and reports what changed: missing or moved signs, worn
//! lane markings, new defects and hazards.
//!
//! # Pipeline
//!
//! 1. `ingest`: decode both sources, decimate to the sample rate, drop blurry
//!    frames and enhance the rest.
//! 2. `align`: register each present frame onto its base frame.
//! 3. `detect`: find road elements in every frame (heuristic or neural backend).
//! 4. `track`: merge detections into tracks; only persistent tracks survive.
//! 5. `classify`: pair base and present tracks and classify each change.
//! 6. `issue`: turn reportable changes into issues with evidence crops.
//!
//! `pipeline::ChangePipeline` runs all of it for one job. Frame sources, the
//! detector and the blob sink are injected, so the same pipeline runs against
//! local files, in-memory fixtures or any other storage.

pub mod align;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod evaluate;
pub mod evidence;
pub mod fixtures;
pub mod frame;
pub mod geometry;
pub mod imaging;
pub mod ingest;
pub mod issue;
pub mod pipeline;
pub mod track;

pub use align::{AlignStatus, AlignedFrame, FrameAligner};
pub use classify::{ChangeClass, ChangeClassifier, ChangeRecord, CropSource, Pass, Severity};
pub use config::{DetectorKind, PipelineConfig};
pub use detect::{Detection, DetectorRegistry, ElementDetector, ElementType, HeuristicDetector};
pub use error::{AlignmentError, DetectorError, EvidenceError, PipelineError, TrackerError};
pub use evaluate::{evaluate, EvaluationMetrics, GroundTruthLabel};
pub use evidence::{BlobSink, FilesystemBlobSink, MemoryBlobSink};
pub use frame::Frame;
pub use geometry::BBox;
pub use ingest::{FrameReader, FrameStream, LocalOpener, SourceOpener};
pub use issue::{Issue, IssueAssembler, IssueStatus};
pub use pipeline::{CancelToken, ChangePipeline, JobResult, JobSummary};
pub use track::{DetectionTracker, Track, TrackId, TrackState};
