//! Source abstraction.
//!
//! The pipeline only ever sees `SourceOpener::open(locator)` and the decoded
//! frames it yields. `LocalOpener` covers the two local cases: a directory of
//! still images, and a video file decoded with FFmpeg.

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::sequence::ImageSequenceSource;
use crate::error::PipelineError;

/// An ordered stream of decoded RGB frames.
pub trait FrameStream: Send {
    /// Native frame rate of the stream, used for decimation.
    fn native_fps(&self) -> f64;

    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Resolves a locator into a frame stream.
pub trait SourceOpener: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameStream>, PipelineError>;
}

/// Opens local image-sequence directories and (with FFmpeg) local video files.
#[derive(Clone, Debug)]
pub struct LocalOpener {
    /// Frame rate assumed for image sequences, which carry no timing.
    pub sequence_fps: f64,
}

impl LocalOpener {
    pub fn new(sequence_fps: f64) -> Self {
        Self { sequence_fps }
    }
}

impl Default for LocalOpener {
    fn default() -> Self {
        Self { sequence_fps: 30.0 }
    }
}

impl SourceOpener for LocalOpener {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameStream>, PipelineError> {
        if !is_local_locator(locator) {
            return Err(PipelineError::unreadable(
                locator,
                "only local paths are supported (no URL schemes)",
            ));
        }
        let path = Path::new(locator);
        if path.is_dir() {
            let source = ImageSequenceSource::open(path, self.sequence_fps)
                .map_err(|e| PipelineError::unreadable(locator, format!("{e:#}")))?;
            log::info!(
                "LocalOpener: {} opened as image sequence ({} images)",
                locator,
                source.len()
            );
            return Ok(Box::new(source));
        }
        if !path.is_file() {
            return Err(PipelineError::unreadable(locator, "no such file or directory"));
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let source = FfmpegFileSource::open(locator)
                .map_err(|e| PipelineError::unreadable(locator, format!("{e:#}")))?;
            log::info!("LocalOpener: {} opened as video file (ffmpeg)", locator);
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(PipelineError::unreadable(
                locator,
                "video file decoding requires the ingest-file-ffmpeg feature",
            ))
        }
    }
}

pub fn is_local_locator(locator: &str) -> bool {
    !locator.trim().is_empty() && !locator.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_url_schemes_and_empty_locators() {
        assert!(!is_local_locator(""));
        assert!(!is_local_locator("s3://bucket/base.mp4"));
        assert!(!is_local_locator("https://example.com/a.mp4"));
        assert!(is_local_locator("/data/base.mp4"));
        assert!(is_local_locator("relative/dir"));
    }

    #[test]
    fn missing_path_is_unreadable() {
        let opener = LocalOpener::default();
        let err = opener.open("/definitely/not/here.mp4").err();
        assert!(matches!(err, Some(PipelineError::SourceUnreadable { .. })));
    }
}
