pub mod heuristic;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use heuristic::{classify_region, HeuristicDetector, RegionFeatures};

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
