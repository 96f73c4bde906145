//! Change Classifier.
//!
//! Pairs confirmed base tracks with confirmed present tracks of the same
//! element type by representative-box IoU and classifies each pairing.
//! Pairings in the unchanged band produce no record.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ClassifierSettings;
use crate::detect::ElementType;
use crate::evidence::crop_region;
use crate::geometry::BBox;
use crate::imaging::{self, structural_similarity};
use crate::track::Track;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    Unchanged,
    Moved,
    Missing,
    Changed,
    Faded,
    New,
}

impl ChangeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Moved => "moved",
            Self::Missing => "missing",
            Self::Changed => "changed",
            Self::Faded => "faded",
            Self::New => "new",
        }
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Info => "INFO",
        }
    }
}

/// Severity lookup by element type and classification.
pub fn severity_for(element: ElementType, class: ChangeClass) -> Severity {
    let critical = element.is_safety_critical();
    match class {
        ChangeClass::Missing if critical => Severity::High,
        ChangeClass::Missing => Severity::Medium,
        ChangeClass::Moved if critical => Severity::Medium,
        ChangeClass::Moved => Severity::Low,
        ChangeClass::Faded => Severity::High,
        ChangeClass::Changed if critical => Severity::Medium,
        ChangeClass::Changed => Severity::Low,
        ChangeClass::New | ChangeClass::Unchanged => Severity::Info,
    }
}

/// Which pass a frame belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Base,
    Present,
}

/// Access to the frames of a job, by pass and accepted-frame index.
pub trait CropSource {
    fn frame(&self, pass: Pass, frame_index: u32) -> Option<&RgbImage>;

    fn crop(&self, pass: Pass, frame_index: u32, bbox: &BBox) -> Option<RgbImage> {
        crop_region(self.frame(pass, frame_index)?, bbox)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChangeRecord {
    pub base_track: Option<Track>,
    pub present_track: Option<Track>,
    pub classification: ChangeClass,
    pub severity: Severity,
    pub confidence: f32,
    pub reason: String,
    /// Representative-box IoU of the pairing, when a counterpart existed.
    pub iou: Option<f32>,
    /// Structural similarity of the crops, when it was measured.
    pub similarity: Option<f32>,
}

impl ChangeRecord {
    /// The base track, or the present track for `new` records.
    pub fn primary_track(&self) -> Option<&Track> {
        self.base_track.as_ref().or(self.present_track.as_ref())
    }

    pub fn element_type(&self) -> Option<ElementType> {
        self.primary_track().map(|t| t.element_type)
    }
}

pub struct ChangeClassifier {
    settings: ClassifierSettings,
}

impl ChangeClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        Self { settings }
    }

    /// IoU bands with strict `<`: each threshold belongs to the higher band.
    pub fn classify_overlap(&self, iou: f32) -> ChangeClass {
        if iou < self.settings.missing_iou {
            ChangeClass::Missing
        } else if iou < self.settings.unchanged_iou {
            ChangeClass::Moved
        } else {
            ChangeClass::Unchanged
        }
    }

    pub fn classify(&self, base: &[Track], present: &[Track], crops: &dyn CropSource) -> Vec<ChangeRecord> {
        let present_boxes: Vec<BBox> = present.iter().map(Track::representative_box).collect();
        let mut claimed = vec![false; present.len()];
        let mut records = Vec::new();

        for base_track in base {
            let base_box = base_track.representative_box();
            let best = present
                .iter()
                .enumerate()
                .filter(|(i, t)| !claimed[*i] && t.element_type == base_track.element_type)
                .map(|(i, _)| (i, base_box.iou(&present_boxes[i])))
                .fold(None, |best: Option<(usize, f32)>, (i, iou)| match best {
                    Some((_, b)) if b >= iou => best,
                    _ => Some((i, iou)),
                });
            let best_iou = best.map_or(0.0, |(_, iou)| iou);
            let mut class = self.classify_overlap(best_iou);
            let mut counterpart = None;
            let mut similarity = None;

            if class != ChangeClass::Missing {
                if let Some((idx, _)) = best {
                    claimed[idx] = true;
                    counterpart = Some(idx);
                    if base_track.element_type.is_surface_element() {
                        similarity = self.crop_similarity(base_track, &present[idx], crops);
                        if similarity.is_some_and(|s| s < self.settings.fade_similarity) {
                            class = ChangeClass::Faded;
                        }
                    }
                }
            } else if self.settings.detect_type_changes {
                if let Some(idx) = self.type_change_candidate(&base_box, present, &present_boxes, &claimed) {
                    claimed[idx] = true;
                    counterpart = Some(idx);
                    class = ChangeClass::Changed;
                }
            }

            if class == ChangeClass::Unchanged {
                continue;
            }
            let present_track = counterpart.map(|idx| present[idx].clone());
            let iou = match (class, counterpart) {
                (ChangeClass::Changed, Some(idx)) => Some(base_box.iou(&present_boxes[idx])),
                _ => Some(best_iou),
            };
            let element = base_track.element_type;
            records.push(ChangeRecord {
                reason: reason_for(
                    element,
                    class,
                    &Metric {
                        iou,
                        similarity,
                        changed_to: present_track.as_ref().map(|t| t.element_type),
                    },
                    base_track.aggregated_confidence,
                ),
                base_track: Some(base_track.clone()),
                present_track,
                classification: class,
                severity: severity_for(element, class),
                confidence: base_track.aggregated_confidence,
                iou,
                similarity,
            });
        }

        for (idx, track) in present.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            records.push(ChangeRecord {
                reason: reason_for(
                    track.element_type,
                    ChangeClass::New,
                    &Metric::default(),
                    track.aggregated_confidence,
                ),
                base_track: None,
                present_track: Some(track.clone()),
                classification: ChangeClass::New,
                severity: severity_for(track.element_type, ChangeClass::New),
                confidence: track.aggregated_confidence,
                iou: None,
                similarity: None,
            });
        }
        records
    }

    fn crop_similarity(&self, base: &Track, present: &Track, crops: &dyn CropSource) -> Option<f32> {
        let base_crop = crops.crop(Pass::Base, base.first_frame, &base.representative_box())?;
        let present_crop = crops.crop(Pass::Present, present.first_frame, &present.representative_box())?;
        Some(structural_similarity(
            &imaging::to_gray(&base_crop),
            &imaging::to_gray(&present_crop),
        ))
    }

    fn type_change_candidate(
        &self,
        base_box: &BBox,
        present: &[Track],
        present_boxes: &[BBox],
        claimed: &[bool],
    ) -> Option<usize> {
        present
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed[*i])
            .map(|(i, _)| (i, base_box.iou(&present_boxes[i])))
            .filter(|(_, iou)| *iou >= self.settings.unchanged_iou)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Default)]
struct Metric {
    iou: Option<f32>,
    similarity: Option<f32>,
    changed_to: Option<ElementType>,
}

fn reason_for(element: ElementType, class: ChangeClass, metric: &Metric, confidence: f32) -> String {
    use ChangeClass::*;
    use ElementType::*;
    let headline = match (element, class) {
        (SignBoard, Missing) => "CRITICAL: traffic sign missing, immediate replacement required",
        (SignBoard, Moved) => "WARNING: sign position altered, verify compliance with standards",
        (SignBoard, Changed) => "NOTICE: sign condition changed, inspect for damage",
        (LaneMarking, Missing) => "HIGH: lane marking completely worn, immediate repainting needed",
        (LaneMarking, Moved) => "MEDIUM: lane alignment shifted, review road geometry",
        (LaneMarking, Faded) => "HIGH: lane marking visibility degraded, schedule repainting",
        (PavementDefect, New) => "HIGH: new pavement defect detected, depth assessment required",
        (PavementDefect, Faded) => "MEDIUM: pavement surface deteriorated, monitor progression",
        (Guardrail, Missing) => "CRITICAL: safety barrier missing, accident risk",
        (Guardrail, Moved) => "HIGH: barrier displacement, structural integrity check needed",
        (Divider, Missing) => "CRITICAL: road divider compromised, traffic separation lost",
        (Divider, Moved) => "HIGH: divider shifted, realignment required",
        (RoadStud, Missing) => "HIGH: road studs missing, night-time delineation reduced",
        (RoadsideHazard, New) => "HIGH: new roadside hazard on carriageway, clearance required",
        _ => "",
    };
    let headline = if headline.is_empty() {
        format!("{}: {} {}", severity_for(element, class).as_str(), element.label(), class.as_str())
    } else {
        headline.to_string()
    };

    let measured = match class {
        New => "no base counterpart".to_string(),
        Missing => format!("best IoU {:.2}", metric.iou.unwrap_or(0.0)),
        Faded => format!(
            "structural similarity {:.2} at IoU {:.2}",
            metric.similarity.unwrap_or(0.0),
            metric.iou.unwrap_or(0.0)
        ),
        Changed => format!(
            "now detected as {} at IoU {:.2}",
            metric.changed_to.map_or("unknown", |e| e.as_str()),
            metric.iou.unwrap_or(0.0)
        ),
        Moved | Unchanged => format!("IoU {:.2}", metric.iou.unwrap_or(0.0)),
    };
    format!("{headline} ({measured}) [confidence {:.1}%]", confidence * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detect::Detection;
    use crate::track::{TrackId, TrackState};
    use image::Rgb;

    fn track(id: u32, element: ElementType, bbox: BBox, first: u32, last: u32) -> Track {
        let detections: Vec<Detection> = (first..=last)
            .map(|f| Detection::new(element, bbox, 0.9, f))
            .collect();
        Track {
            id: TrackId(id),
            element_type: element,
            detections,
            first_frame: first,
            last_frame: last,
            aggregated_confidence: 0.9,
            state: TrackState::Closed,
            confirmed: true,
        }
    }

    /// Base crops show a striped pattern; present crops show it scaled by
    /// `present_scale`.
    struct StripedCrops {
        present_scale: f32,
    }

    impl CropSource for StripedCrops {
        fn frame(&self, _: Pass, _: u32) -> Option<&RgbImage> {
            None
        }

        fn crop(&self, pass: Pass, _frame_index: u32, bbox: &BBox) -> Option<RgbImage> {
            let scale = match pass {
                Pass::Base => 1.0,
                Pass::Present => self.present_scale,
            };
            let (w, h) = (bbox.width() as u32, bbox.height() as u32);
            Some(RgbImage::from_fn(w, h, |x, y| {
                let base = 120.0 + 60.0 * (((x / 3 + y / 2) % 2) as f32) + x as f32;
                let v = (base * scale).round().clamp(0.0, 255.0) as u8;
                Rgb([v, v, v])
            }))
        }
    }

    struct NoCrops;

    impl CropSource for NoCrops {
        fn frame(&self, _: Pass, _: u32) -> Option<&RgbImage> {
            None
        }
    }

    fn classifier() -> ChangeClassifier {
        ChangeClassifier::new(PipelineConfig::default().classifier)
    }

    #[test]
    fn boundaries_belong_to_the_higher_band() {
        let c = classifier();
        // IoU exactly 0.3: 60 / 200.
        let a = BBox::new(0.0, 0.0, 13.0, 10.0);
        let b = BBox::new(7.0, 0.0, 20.0, 10.0);
        assert_eq!(a.iou(&b), 0.3);
        assert_eq!(c.classify_overlap(a.iou(&b)), ChangeClass::Moved);
        // IoU exactly 0.6: 120 / 200.
        let a = BBox::new(0.0, 0.0, 16.0, 10.0);
        let b = BBox::new(4.0, 0.0, 20.0, 10.0);
        assert_eq!(a.iou(&b), 0.6);
        assert_eq!(c.classify_overlap(a.iou(&b)), ChangeClass::Unchanged);
        assert_eq!(c.classify_overlap(0.2999), ChangeClass::Missing);
    }

    #[test]
    fn vanished_sign_is_missing_high() {
        let base = [track(0, ElementType::SignBoard, BBox::new(200.0, 200.0, 260.0, 260.0), 0, 39)];
        let records = classifier().classify(&base, &[], &NoCrops);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.classification, ChangeClass::Missing);
        assert_eq!(r.severity, Severity::High);
        assert_eq!(r.iou, Some(0.0));
        assert!(r.reason.contains("traffic sign missing"));
        assert!(r.reason.contains("best IoU 0.00"));
    }

    #[test]
    fn identical_tracks_produce_no_records() {
        let tracks = [
            track(0, ElementType::SignBoard, BBox::new(200.0, 200.0, 260.0, 260.0), 0, 10),
            track(1, ElementType::LaneMarking, BBox::new(100.0, 295.0, 540.0, 305.0), 0, 10),
        ];
        let crops = StripedCrops { present_scale: 1.0 };
        assert!(classifier().classify(&tracks, &tracks, &crops).is_empty());
    }

    #[test]
    fn shifted_divider_is_moved_medium() {
        let base = [track(0, ElementType::Divider, BBox::new(0.0, 0.0, 16.0, 10.0), 0, 5)];
        let present = [track(0, ElementType::Divider, BBox::new(6.0, 0.0, 22.0, 10.0), 0, 5)];
        let records = classifier().classify(&base, &present, &NoCrops);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, ChangeClass::Moved);
        assert_eq!(records[0].severity, Severity::Medium);
        assert!(records[0].present_track.is_some());
    }

    #[test]
    fn darkened_lane_marking_is_faded() {
        let lane = BBox::new(100.0, 280.0, 124.0, 292.0);
        let base = [track(0, ElementType::LaneMarking, lane, 0, 9)];
        let present = [track(0, ElementType::LaneMarking, lane, 0, 9)];
        let records = classifier().classify(&base, &present, &StripedCrops { present_scale: 0.3 });
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.classification, ChangeClass::Faded);
        assert_eq!(r.severity, Severity::High);
        assert!(r.similarity.is_some_and(|s| s < 0.6));
    }

    #[test]
    fn fade_check_only_applies_to_surface_elements() {
        let b = BBox::new(100.0, 280.0, 124.0, 292.0);
        let base = [track(0, ElementType::SignBoard, b, 0, 9)];
        let present = [track(0, ElementType::SignBoard, b, 0, 9)];
        let records = classifier().classify(&base, &present, &StripedCrops { present_scale: 0.3 });
        assert!(records.is_empty());
    }

    #[test]
    fn unmatched_present_track_is_new_info() {
        let present = [track(4, ElementType::PavementDefect, BBox::new(300.0, 300.0, 340.0, 330.0), 2, 8)];
        let records = classifier().classify(&[], &present, &NoCrops);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, ChangeClass::New);
        assert_eq!(records[0].severity, Severity::Info);
        assert_eq!(records[0].primary_track().map(|t| t.id), Some(TrackId(4)));
    }

    #[test]
    fn present_tracks_are_claimed_once() {
        let b = BBox::new(10.0, 10.0, 50.0, 50.0);
        let base = [
            track(0, ElementType::RoadStud, b, 0, 5),
            track(1, ElementType::RoadStud, b, 0, 5),
        ];
        let present = [track(0, ElementType::RoadStud, b, 0, 5)];
        let records = classifier().classify(&base, &present, &NoCrops);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, ChangeClass::Missing);
        assert_eq!(records[0].base_track.as_ref().map(|t| t.id), Some(TrackId(1)));
    }

    #[test]
    fn type_change_is_opt_in() {
        let b = BBox::new(10.0, 10.0, 50.0, 50.0);
        let base = [track(0, ElementType::SignBoard, b, 0, 5)];
        let present = [track(0, ElementType::RoadsideHazard, b, 0, 5)];

        let default_records = classifier().classify(&base, &present, &NoCrops);
        let classes: Vec<_> = default_records.iter().map(|r| r.classification).collect();
        assert_eq!(classes, vec![ChangeClass::Missing, ChangeClass::New]);

        let mut settings = PipelineConfig::default().classifier;
        settings.detect_type_changes = true;
        let records = ChangeClassifier::new(settings).classify(&base, &present, &NoCrops);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, ChangeClass::Changed);
        assert_eq!(records[0].severity, Severity::Medium);
        assert!(records[0].reason.contains("roadside_hazard"));
    }

    #[test]
    fn severity_table() {
        assert_eq!(severity_for(ElementType::Guardrail, ChangeClass::Missing), Severity::High);
        assert_eq!(severity_for(ElementType::PavementDefect, ChangeClass::Missing), Severity::Medium);
        assert_eq!(severity_for(ElementType::RoadsideHazard, ChangeClass::Moved), Severity::Low);
        assert_eq!(severity_for(ElementType::LaneMarking, ChangeClass::Faded), Severity::High);
        assert_eq!(severity_for(ElementType::SignBoard, ChangeClass::New), Severity::Info);
    }
}
