//! Contour and colour heuristics.
//!
//! Edges → filled outer regions → per-region feature vector → the first
//! matching rule of an ordered, mutually exclusive rule list. No model file
//! is needed, which makes this backend the fallback for every deployment.
//!
//! Edges and colours are read from a Gaussian-smoothed copy of the frame so
//! that pixel-scale texture left or sharpened by enhancement (asphalt grain,
//! worn paint) neither fires Canny nor splits colour masks.

use image::RgbImage;

use crate::config::DetectorSettings;
use crate::detect::backend::ElementDetector;
use crate::detect::filter::{keep_top_n, non_max_suppression};
use crate::detect::result::{Detection, ElementType};
use crate::error::DetectorError;
use crate::frame::Frame;
use crate::imaging::{self, ColorProfile, Region};

const MAX_CONFIDENCE: f32 = 0.98;

/// Geometry and colour of one candidate region.
#[derive(Clone, Copy, Debug)]
pub struct RegionFeatures {
    /// Box width over height.
    pub aspect: f32,
    /// Box centre height as a fraction of the frame height (0 = top).
    pub vertical_position: f32,
    pub solidity: f32,
    /// Filled area in pixels.
    pub area: f32,
    /// Shorter box side as a fraction of the frame height.
    pub thickness: f32,
    pub color: ColorProfile,
}

impl RegionFeatures {
    /// Features of `region` measured on `view`, the smoothed frame.
    pub fn of_region(region: &Region, view: &RgbImage) -> Self {
        let bbox = region.bbox();
        let (_, cy) = bbox.center();
        let frame_h = view.height().max(1) as f32;
        Self {
            aspect: bbox.width() / bbox.height().max(1.0),
            vertical_position: cy / frame_h,
            solidity: region.solidity(),
            area: region.area() as f32,
            thickness: bbox.width().min(bbox.height()) / frame_h,
            color: ColorProfile::of_pixels(view, &region.pixels),
        }
    }

    fn is_elongated(&self, ratio: f32) -> bool {
        self.aspect >= ratio || self.aspect <= 1.0 / ratio
    }

    fn paint_ratio(&self) -> f32 {
        self.color.white_ratio + self.color.yellow_ratio
    }
}

type Rule = fn(&RegionFeatures) -> Option<f32>;

/// Evaluated in order; the first rule returning a confidence wins.
const RULES: [(ElementType, Rule); 7] = [
    (ElementType::RoadsideHazard, roadside_hazard),
    (ElementType::SignBoard, sign_board),
    (ElementType::Divider, divider),
    (ElementType::LaneMarking, lane_marking),
    (ElementType::RoadStud, road_stud),
    (ElementType::Guardrail, guardrail),
    (ElementType::PavementDefect, pavement_defect),
];

/// Classify a region, returning its element type and confidence in
/// `[0, 0.98]`.
pub fn classify_region(features: &RegionFeatures) -> Option<(ElementType, f32)> {
    RULES.iter().find_map(|(element, rule)| {
        rule(features).map(|confidence| (*element, confidence.clamp(0.0, MAX_CONFIDENCE)))
    })
}

// Cones, barrels and debris with warning paint on the carriageway.
fn roadside_hazard(f: &RegionFeatures) -> Option<f32> {
    (f.color.red_ratio >= 0.4 && f.vertical_position >= 0.55 && f.solidity >= 0.5)
        .then(|| 0.5 + 0.4 * f.color.red_ratio)
}

fn sign_board(f: &RegionFeatures) -> Option<f32> {
    let sign_colour = f.color.green_ratio + f.color.red_ratio;
    (f.vertical_position < 0.75
        && (0.5..=2.0).contains(&f.aspect)
        && f.solidity >= 0.8
        && sign_colour >= 0.35)
        .then(|| 0.6 + 0.35 * sign_colour.min(1.0))
}

// Raised median: thicker than paint, yellow-dominant.
fn divider(f: &RegionFeatures) -> Option<f32> {
    (f.color.yellow_ratio >= 0.3
        && f.is_elongated(2.5)
        && f.thickness >= 0.04
        && f.solidity >= 0.4
        && f.vertical_position >= 0.4)
        .then(|| 0.5 + 0.4 * f.color.yellow_ratio)
}

fn lane_marking(f: &RegionFeatures) -> Option<f32> {
    let paint = f.paint_ratio();
    (paint >= 0.5 && f.is_elongated(3.0) && f.solidity >= 0.5 && f.vertical_position >= 0.5)
        .then(|| 0.55 + 0.4 * paint.min(1.0))
}

fn road_stud(f: &RegionFeatures) -> Option<f32> {
    let reflective = f.paint_ratio() + f.color.red_ratio;
    (f.area <= 400.0
        && (0.5..=2.0).contains(&f.aspect)
        && f.vertical_position >= 0.5
        && (f.color.brightness >= 180.0 || reflective >= 0.5))
        .then(|| 0.45 + 0.4 * reflective.min(1.0))
}

// Long, unsaturated, bright: galvanised steel.
fn guardrail(f: &RegionFeatures) -> Option<f32> {
    (f.aspect >= 4.0
        && (0.35..=0.85).contains(&f.vertical_position)
        && f.color.saturation <= 25.0
        && f.color.brightness >= 110.0
        && f.solidity >= 0.3)
        .then(|| 0.5 + 0.3 * (f.aspect / 10.0).min(1.0))
}

// Dark, unsaturated patches on the road surface: potholes, wet cracks.
fn pavement_defect(f: &RegionFeatures) -> Option<f32> {
    (f.vertical_position >= 0.6
        && f.color.brightness <= 60.0
        && f.color.saturation <= 30.0
        && f.solidity >= 0.3)
        .then(|| 0.4 + 0.5 * (1.0 - f.color.brightness / 60.0))
}

pub struct HeuristicDetector {
    settings: DetectorSettings,
}

impl HeuristicDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }
}

impl ElementDetector for HeuristicDetector {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        if frame.width() < 3 || frame.height() < 3 {
            return Ok(Vec::new());
        }
        let view = imaging::gaussian_blur3_rgb(frame.pixels());
        let edges = imaging::canny(&imaging::to_gray(&view), self.settings.canny_low, self.settings.canny_high);
        let edges = imaging::dilate(&edges);

        let mut detections = Vec::new();
        for region in imaging::external_regions(&edges, self.settings.min_contour_area) {
            let features = RegionFeatures::of_region(&region, &view);
            if let Some((element, confidence)) = classify_region(&features) {
                detections.push(Detection::new(element, region.bbox(), confidence, frame.index));
            }
        }
        let detections = non_max_suppression(detections, self.settings.nms_iou);
        Ok(keep_top_n(detections, self.settings.top_n))
    }
}
