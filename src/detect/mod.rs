//! Element Detector.
//!
//! One contract (`ElementDetector`) with two interchangeable backends:
//! - `heuristic`: edges, filled contours and colour masks, always available
//! - `neural`: an ONNX object detector run with tract (feature: backend-tract)
//!
//! `DetectorRegistry` picks the backend from configuration and falls back to
//! the heuristic backend when the neural one cannot be loaded.

mod backend;
mod backends;
mod filter;
mod registry;
mod result;

pub use backend::ElementDetector;
pub use backends::{classify_region, HeuristicDetector, RegionFeatures};
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use filter::{apply_confidence_rules, keep_top_n, non_max_suppression};
pub use registry::{load_neural, DetectorRegistry};
pub use result::{Detection, ElementType};
