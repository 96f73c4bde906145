//! Decoded, sampled video frames.
//!
//! A `Frame` lives only for the duration of one job: the reader produces it,
//! alignment and detection read it, and evidence crops are cut from it before
//! the job drops it. Whole frames are never persisted.

use std::time::Duration;

use image::{GrayImage, RgbImage};

#[derive(Clone)]
pub struct Frame {
    /// Position in the accepted (post quality gate) sequence of its pass.
    pub index: u32,
    /// Index of the decoded frame in the underlying stream.
    pub source_index: u64,
    /// Locator of the stream the frame came from.
    pub source_id: String,
    /// Presentation time relative to the start of the stream.
    pub timestamp: Duration,
    pixels: RgbImage,
}

impl Frame {
    pub fn new(
        index: u32,
        source_index: u64,
        source_id: impl Into<String>,
        timestamp: Duration,
        pixels: RgbImage,
    ) -> Self {
        Self {
            index,
            source_index,
            source_id: source_id.into(),
            timestamp,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn gray(&self) -> GrayImage {
        crate::imaging::to_gray(&self.pixels)
    }

    /// Same frame metadata with replaced pixels (used for aligned copies).
    pub fn with_pixels(&self, pixels: RgbImage) -> Self {
        Self {
            index: self.index,
            source_index: self.source_index,
            source_id: self.source_id.clone(),
            timestamp: self.timestamp,
            pixels,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is deliberately left out of debug output.
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("source_index", &self.source_index)
            .field("source_id", &self.source_id)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
