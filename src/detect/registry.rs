use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{DetectorKind, DetectorSettings};
use crate::error::DetectorError;

use super::backend::ElementDetector;
use super::backends::HeuristicDetector;

/// Detectors available to a worker, keyed by backend name.
///
/// Detectors are loaded once per worker and handed to each job as a shared
/// `Arc`; nothing here is re-initialised per call.
pub struct DetectorRegistry {
    detectors: HashMap<&'static str, Arc<dyn ElementDetector>>,
    default_name: Option<&'static str>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
            default_name: None,
        }
    }

    /// Build the registry described by configuration.
    ///
    /// The heuristic backend is always registered. A requested neural backend
    /// that fails to load is logged and the heuristic backend stays default.
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HeuristicDetector::new(settings.clone())));
        if settings.backend == DetectorKind::Neural {
            match load_neural(settings) {
                Ok(detector) => {
                    let name = detector.name();
                    registry.register(detector);
                    registry.default_name = Some(name);
                }
                Err(e) => {
                    log::warn!("{}; falling back to the heuristic detector", e);
                }
            }
        }
        registry
    }

    /// Register a detector. The first registered detector becomes the default.
    pub fn register(&mut self, detector: Arc<dyn ElementDetector>) {
        let name = detector.name();
        if self.default_name.is_none() {
            self.default_name = Some(name);
        }
        self.detectors.insert(name, detector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ElementDetector>> {
        self.detectors.get(name).cloned()
    }

    pub fn default_detector(&self) -> Option<Arc<dyn ElementDetector>> {
        self.default_name.and_then(|name| self.get(name))
    }

    /// Registered detector names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.detectors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the neural backend named by configuration.
pub fn load_neural(settings: &DetectorSettings) -> Result<Arc<dyn ElementDetector>, DetectorError> {
    let Some(model_path) = settings.model_path.as_ref() else {
        return Err(DetectorError::Unavailable("no model_path configured".into()));
    };
    #[cfg(feature = "backend-tract")]
    {
        super::backends::TractDetector::load(model_path, settings)
            .map(|d| Arc::new(d) as Arc<dyn ElementDetector>)
            .map_err(|e| DetectorError::Unavailable(format!("{e:#}")))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(DetectorError::Unavailable(format!(
            "cannot load {}: built without the backend-tract feature",
            model_path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detect::Detection;
    use crate::frame::Frame;

    struct NamedDetector(&'static str);

    impl ElementDetector for NamedDetector {
        fn name(&self) -> &'static str {
            self.0
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn first_registered_is_default_and_list_is_sorted() {
        let mut registry = DetectorRegistry::new();
        registry.register(Arc::new(NamedDetector("b")));
        registry.register(Arc::new(NamedDetector("a")));
        assert_eq!(registry.default_detector().map(|d| d.name()), Some("b"));
        assert_eq!(registry.list(), vec!["a", "b"]);
    }

    #[test]
    fn heuristic_is_default() {
        let registry = DetectorRegistry::from_settings(&PipelineConfig::default().detector);
        assert_eq!(registry.list(), vec!["heuristic"]);
        assert_eq!(registry.default_detector().map(|d| d.name()), Some("heuristic"));
    }

    #[test]
    fn unloadable_neural_falls_back_to_heuristic() {
        let mut settings = PipelineConfig::default().detector;
        settings.backend = DetectorKind::Neural;
        settings.model_path = Some("/nonexistent/model.onnx".into());
        let registry = DetectorRegistry::from_settings(&settings);
        assert_eq!(registry.default_detector().map(|d| d.name()), Some("heuristic"));
        assert!(registry.get("neural").is_none());
    }

    #[test]
    fn missing_model_path_is_unavailable() {
        let settings = PipelineConfig::default().detector;
        assert!(matches!(load_neural(&settings), Err(DetectorError::Unavailable(_))));
    }
}
