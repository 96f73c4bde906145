//! Frame ingestion.
//!
//! This module turns a source locator into the ordered, subsampled,
//! quality-gated frames that the rest of the pipeline consumes:
//! - `SourceOpener` resolves a locator into a `FrameStream` (where the video
//!   bytes live is the opener's business, not the pipeline's)
//! - Image-sequence directories are always supported
//! - Local video files decode through FFmpeg (feature: ingest-file-ffmpeg)
//! - `FrameReader` decimates to the target rate, applies the blur gate and
//!   enhances accepted frames
//!
//! The ingestion layer MUST NOT:
//! - Substitute synthetic frames for an unreadable source
//! - Store decoded frames to disk
//! - Log raw frame content

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod quality;
mod reader;
mod sequence;
mod source;

pub use quality::{enhance, is_blurry, measure_sharpness, SharpnessScore};
pub use reader::{FrameReader, ReaderStats, SampledFrames};
pub use sequence::ImageSequenceSource;
pub use source::{is_local_locator, FrameStream, LocalOpener, SourceOpener};
