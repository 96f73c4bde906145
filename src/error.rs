//! Typed errors for each pipeline stage.
//!
//! Only `PipelineError` is ever returned from `ChangePipeline::run`. The other
//! stage errors are consumed where they occur and replaced by the stage's
//! fallback (unaligned frame, heuristic detector, empty evidence reference).

use thiserror::Error;

/// Job-level failure. Fatal to the job that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source '{locator}' cannot be decoded: {reason}")]
    SourceUnreadable { locator: String, reason: String },

    #[error("source '{locator}' yielded no usable frames ({decoded} decoded, {rejected} rejected as blurry)")]
    NoUsableFrames {
        locator: String,
        decoded: u64,
        rejected: u64,
    },

    #[error("job cancelled after {completed} frame pairs")]
    Cancelled { completed: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub(crate) fn unreadable(locator: &str, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnreadable {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Why a present frame could not be registered onto its base frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("too few keypoints (base {base}, present {present})")]
    TooFewKeypoints { base: usize, present: usize },

    #[error("too few cross-checked matches ({0})")]
    TooFewMatches(usize),

    #[error("homography estimation failed: {0}")]
    DegenerateHomography(&'static str),
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector backend unavailable: {0}")]
    Unavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("failed to encode evidence crop: {0}")]
    Encode(String),

    #[error("failed to persist evidence blob: {0}")]
    PersistFailed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("detections must arrive in frame order (last {last}, got {got})")]
    OutOfOrder { last: u32, got: u32 },
}
