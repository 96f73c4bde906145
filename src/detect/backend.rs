use crate::error::DetectorError;
use crate::frame::Frame;

use super::result::Detection;

/// Element detector contract shared by every backend.
///
/// Detectors are loaded once and shared read-only across jobs and worker
/// threads, so `detect` takes `&self`. Implementations must:
/// - Treat the frame as read-only and not retain its pixels
/// - Return boxes in the frame's pixel coordinates
/// - Return at most the configured top-N detections, strongest first
pub trait ElementDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}
