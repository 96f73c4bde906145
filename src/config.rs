use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::detect::ElementType;
use crate::error::PipelineError;

const DEFAULT_SAMPLE_RATE: f64 = 1.0;
const DEFAULT_MAX_FRAMES: usize = 120;
const DEFAULT_SEQUENCE_FPS: f64 = 30.0;
const DEFAULT_BLUR_THRESHOLD: f64 = 80.0;
const DEFAULT_PERSIST_N: usize = 3;
const DEFAULT_MIN_DENSITY: f32 = 0.4;
const DEFAULT_MIN_TRACK_CONFIDENCE: f32 = 0.65;
const DEFAULT_MAX_TRACKING_DISTANCE: f32 = 150.0;
const DEFAULT_BLOB_ROOT: &str = "evidence";

// ----------------------------------------------------------------------------
// File representation (every field optional)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    sampling: Option<SamplingFile>,
    quality: Option<QualityFile>,
    alignment: Option<AlignmentFile>,
    detector: Option<DetectorFile>,
    tracker: Option<TrackerFile>,
    classifier: Option<ClassifierFile>,
    evidence: Option<EvidenceFile>,
    parallel_detection: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingFile {
    sample_rate: Option<f64>,
    max_frames: Option<usize>,
    sequence_fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct QualityFile {
    blur_threshold: Option<f64>,
    use_sobel: Option<bool>,
    enhance: Option<bool>,
    clahe_clip_limit: Option<f32>,
    clahe_tiles: Option<u32>,
    gamma: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlignmentFile {
    enabled: Option<bool>,
    max_features: Option<usize>,
    fast_threshold: Option<u8>,
    pyramid_levels: Option<usize>,
    ransac_threshold: Option<f64>,
    ransac_iterations: Option<usize>,
    min_matches: Option<usize>,
    min_inliers: Option<usize>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    class_thresholds: Option<BTreeMap<String, f32>>,
    default_threshold: Option<f32>,
    base_confidence: Option<f32>,
    nms_iou: Option<f32>,
    min_bbox_area: Option<f32>,
    edge_margin: Option<f32>,
    edge_penalty: Option<f32>,
    top_n: Option<usize>,
    min_contour_area: Option<usize>,
    canny_low: Option<f32>,
    canny_high: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerFile {
    persist_n: Option<usize>,
    min_density: Option<f32>,
    min_track_confidence: Option<f32>,
    max_tracking_distance: Option<f32>,
    weight_step: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierFile {
    missing_iou: Option<f32>,
    unchanged_iou: Option<f32>,
    fade_similarity: Option<f32>,
    detect_type_changes: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct EvidenceFile {
    blob_root: Option<PathBuf>,
    crop_expand: Option<f32>,
    jpeg_quality: Option<u8>,
    annotate: Option<bool>,
}

// ----------------------------------------------------------------------------
// Resolved settings
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sampling: SamplingSettings,
    pub quality: QualitySettings,
    pub alignment: AlignmentSettings,
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub classifier: ClassifierSettings,
    pub evidence: EvidenceSettings,
    /// Run per-frame detection on the rayon pool. Tracking stays ordered.
    pub parallel_detection: bool,
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    /// Target frames per second to keep from each stream.
    pub sample_rate: f64,
    /// Cap on emitted frames per stream.
    pub max_frames: usize,
    /// Native rate assumed for image-sequence sources.
    pub sequence_fps: f64,
}

#[derive(Debug, Clone)]
pub struct QualitySettings {
    /// A frame is rejected when its Laplacian variance is below this value
    /// (and, with `use_sobel`, its Sobel variance is below twice this value).
    pub blur_threshold: f64,
    pub use_sobel: bool,
    pub enhance: bool,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub gamma: f32,
}

#[derive(Debug, Clone)]
pub struct AlignmentSettings {
    pub enabled: bool,
    pub max_features: usize,
    pub fast_threshold: u8,
    pub pyramid_levels: usize,
    /// RANSAC inlier reprojection threshold in pixels.
    pub ransac_threshold: f64,
    pub ransac_iterations: usize,
    pub min_matches: usize,
    pub min_inliers: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Heuristic,
    Neural,
}

impl FromStr for DetectorKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "cpu" => Ok(Self::Heuristic),
            "neural" | "tract" | "onnx" => Ok(Self::Neural),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown detector backend '{other}' (expected heuristic or neural)"
            ))),
        }
    }
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Neural => "neural",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    /// Square model input edge, in pixels.
    pub input_size: u32,
    /// Model class index → element type name.
    pub class_names: Vec<String>,
    pub class_thresholds: BTreeMap<ElementType, f32>,
    pub default_threshold: f32,
    /// Raw score floor applied before per-class thresholds.
    pub base_confidence: f32,
    pub nms_iou: f32,
    pub min_bbox_area: f32,
    pub edge_margin: f32,
    /// Multiplier on the class threshold for boxes touching the frame border.
    pub edge_penalty: f32,
    pub top_n: usize,
    pub min_contour_area: usize,
    pub canny_low: f32,
    pub canny_high: f32,
}

impl DetectorSettings {
    pub fn threshold_for(&self, element: ElementType) -> f32 {
        self.class_thresholds
            .get(&element)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub persist_n: usize,
    pub min_density: f32,
    pub min_track_confidence: f32,
    pub max_tracking_distance: f32,
    /// Recency weight ramp: detection `i` weighs `1 + i * weight_step`.
    pub weight_step: f32,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub missing_iou: f32,
    pub unchanged_iou: f32,
    pub fade_similarity: f32,
    pub detect_type_changes: bool,
}

#[derive(Debug, Clone)]
pub struct EvidenceSettings {
    pub blob_root: PathBuf,
    pub crop_expand: f32,
    pub jpeg_quality: u8,
    pub annotate: bool,
}

pub fn default_class_names() -> Vec<String> {
    [
        ElementType::SignBoard,
        ElementType::LaneMarking,
        ElementType::Guardrail,
        ElementType::PavementDefect,
        ElementType::RoadStud,
        ElementType::RoadsideHazard,
        ElementType::Divider,
    ]
    .iter()
    .map(|e| e.as_str().to_string())
    .collect()
}

pub fn default_class_thresholds() -> BTreeMap<ElementType, f32> {
    BTreeMap::from([
        (ElementType::SignBoard, 0.80),
        (ElementType::LaneMarking, 0.60),
        (ElementType::Divider, 0.65),
        (ElementType::Guardrail, 0.70),
        (ElementType::PavementDefect, 0.35),
        (ElementType::RoadStud, 0.50),
        (ElementType::RoadsideHazard, 0.55),
    ])
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // The file defaults are the single source of truth; an empty file
        // always resolves.
        Self::from_file(PipelineConfigFile::default())
            .unwrap_or_else(|_| unreachable!("built-in defaults are valid"))
    }
}

impl PipelineConfig {
    /// Load from the file named by `ROADCOMPARE_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self, PipelineError> {
        let config_path = std::env::var("ROADCOMPARE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self, PipelineError> {
        let sampling = file.sampling.unwrap_or_default();
        let quality = file.quality.unwrap_or_default();
        let alignment = file.alignment.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let classifier = file.classifier.unwrap_or_default();
        let evidence = file.evidence.unwrap_or_default();

        let mut class_thresholds = default_class_thresholds();
        if let Some(overrides) = detector.class_thresholds {
            for (name, threshold) in overrides {
                class_thresholds.insert(name.parse()?, threshold);
            }
        }
        let backend = match detector.backend {
            Some(name) => name.parse()?,
            None => DetectorKind::Heuristic,
        };

        Ok(Self {
            sampling: SamplingSettings {
                sample_rate: sampling.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
                max_frames: sampling.max_frames.unwrap_or(DEFAULT_MAX_FRAMES),
                sequence_fps: sampling.sequence_fps.unwrap_or(DEFAULT_SEQUENCE_FPS),
            },
            quality: QualitySettings {
                blur_threshold: quality.blur_threshold.unwrap_or(DEFAULT_BLUR_THRESHOLD),
                use_sobel: quality.use_sobel.unwrap_or(true),
                enhance: quality.enhance.unwrap_or(true),
                clahe_clip_limit: quality.clahe_clip_limit.unwrap_or(2.5),
                clahe_tiles: quality.clahe_tiles.unwrap_or(8),
                gamma: quality.gamma.unwrap_or(1.2),
            },
            alignment: AlignmentSettings {
                enabled: alignment.enabled.unwrap_or(true),
                max_features: alignment.max_features.unwrap_or(1000),
                fast_threshold: alignment.fast_threshold.unwrap_or(20),
                pyramid_levels: alignment.pyramid_levels.unwrap_or(3),
                ransac_threshold: alignment.ransac_threshold.unwrap_or(5.0),
                ransac_iterations: alignment.ransac_iterations.unwrap_or(500),
                min_matches: alignment.min_matches.unwrap_or(4),
                min_inliers: alignment.min_inliers.unwrap_or(8),
                seed: alignment.seed.unwrap_or(0x5eed_a11e),
            },
            detector: DetectorSettings {
                backend,
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(640),
                class_names: detector.class_names.unwrap_or_else(default_class_names),
                class_thresholds,
                default_threshold: detector.default_threshold.unwrap_or(0.5),
                base_confidence: detector.base_confidence.unwrap_or(0.25),
                nms_iou: detector.nms_iou.unwrap_or(0.45),
                min_bbox_area: detector.min_bbox_area.unwrap_or(100.0),
                edge_margin: detector.edge_margin.unwrap_or(5.0),
                edge_penalty: detector.edge_penalty.unwrap_or(1.2),
                top_n: detector.top_n.unwrap_or(15),
                min_contour_area: detector.min_contour_area.unwrap_or(150),
                canny_low: detector.canny_low.unwrap_or(40.0),
                canny_high: detector.canny_high.unwrap_or(100.0),
            },
            tracker: TrackerSettings {
                persist_n: tracker.persist_n.unwrap_or(DEFAULT_PERSIST_N),
                min_density: tracker.min_density.unwrap_or(DEFAULT_MIN_DENSITY),
                min_track_confidence: tracker
                    .min_track_confidence
                    .unwrap_or(DEFAULT_MIN_TRACK_CONFIDENCE),
                max_tracking_distance: tracker
                    .max_tracking_distance
                    .unwrap_or(DEFAULT_MAX_TRACKING_DISTANCE),
                weight_step: tracker.weight_step.unwrap_or(0.1),
            },
            classifier: ClassifierSettings {
                missing_iou: classifier.missing_iou.unwrap_or(0.3),
                unchanged_iou: classifier.unchanged_iou.unwrap_or(0.6),
                fade_similarity: classifier.fade_similarity.unwrap_or(0.6),
                detect_type_changes: classifier.detect_type_changes.unwrap_or(false),
            },
            evidence: EvidenceSettings {
                blob_root: evidence
                    .blob_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB_ROOT)),
                crop_expand: evidence.crop_expand.unwrap_or(1.3),
                jpeg_quality: evidence.jpeg_quality.unwrap_or(90),
                annotate: evidence.annotate.unwrap_or(true),
            },
            parallel_detection: file.parallel_detection.unwrap_or(true),
        })
    }

    fn apply_env(&mut self) -> Result<(), PipelineError> {
        if let Some(rate) = env_parse::<f64>("ROADCOMPARE_SAMPLE_RATE")? {
            self.sampling.sample_rate = rate;
        }
        if let Some(max_frames) = env_parse::<usize>("ROADCOMPARE_MAX_FRAMES")? {
            self.sampling.max_frames = max_frames;
        }
        if let Some(persist_n) = env_parse::<usize>("ROADCOMPARE_PERSIST_N")? {
            self.tracker.persist_n = persist_n;
        }
        if let Some(threshold) = env_parse::<f64>("ROADCOMPARE_BLUR_THRESHOLD")? {
            self.quality.blur_threshold = threshold;
        }
        if let Some(backend) = env_nonempty("ROADCOMPARE_DETECTOR") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = env_nonempty("ROADCOMPARE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(root) = env_nonempty("ROADCOMPARE_BLOB_ROOT") {
            self.evidence.blob_root = PathBuf::from(root);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));
        if !(self.sampling.sample_rate > 0.0) {
            return invalid("sample_rate must be greater than zero".into());
        }
        if self.sampling.max_frames == 0 {
            return invalid("max_frames must be at least 1".into());
        }
        if !(self.sampling.sequence_fps > 0.0) {
            return invalid("sequence_fps must be greater than zero".into());
        }
        if self.quality.blur_threshold < 0.0 {
            return invalid("blur_threshold must not be negative".into());
        }
        if self.tracker.persist_n == 0 {
            return invalid("persist_n must be at least 1".into());
        }
        let unit = [
            ("min_density", self.tracker.min_density),
            ("min_track_confidence", self.tracker.min_track_confidence),
            ("missing_iou", self.classifier.missing_iou),
            ("unchanged_iou", self.classifier.unchanged_iou),
            ("fade_similarity", self.classifier.fade_similarity),
            ("default_threshold", self.detector.default_threshold),
            ("base_confidence", self.detector.base_confidence),
            ("nms_iou", self.detector.nms_iou),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        for (element, value) in &self.detector.class_thresholds {
            if !(0.0..=1.0).contains(value) {
                return invalid(format!(
                    "class threshold for {} must be within [0, 1], got {value}",
                    element.as_str()
                ));
            }
        }
        if self.classifier.missing_iou >= self.classifier.unchanged_iou {
            return invalid("missing_iou must be below unchanged_iou".into());
        }
        if self.tracker.max_tracking_distance <= 0.0 {
            return invalid("max_tracking_distance must be greater than zero".into());
        }
        if self.detector.top_n == 0 {
            return invalid("top_n must be at least 1".into());
        }
        if self.detector.canny_low > self.detector.canny_high {
            return invalid("canny_low must not exceed canny_high".into());
        }
        if self.evidence.crop_expand < 1.0 {
            return invalid("crop_expand must be at least 1.0".into());
        }
        if self.detector.backend == DetectorKind::Neural && self.detector.model_path.is_none() {
            log::warn!("neural detector selected without model_path; heuristic fallback will be used");
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::InvalidConfig(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        PipelineError::InvalidConfig(format!("invalid config file {}: {}", path.display(), e))
    })
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, PipelineError> {
    match env_nonempty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::InvalidConfig(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(None),
    }
}
