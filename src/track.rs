//! Detection Tracker.
//!
//! Detections are merged into tracks held in an arena and addressed by
//! `TrackId`. Association is by nearest centroid within the same element type;
//! at the end of a pass only tracks meeting the persistence invariant survive.

use serde::Serialize;

use crate::config::TrackerSettings;
use crate::detect::{Detection, ElementType};
use crate::error::TrackerError;
use crate::geometry::{median_box, BBox};

/// Index into the tracker's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Open, not (yet) meeting the persistence invariant.
    Tentative,
    /// Open and currently meeting the persistence invariant.
    Confirmed,
    /// Finalised at the end of the pass.
    Closed,
}

#[derive(Clone, Debug, Serialize)]
pub struct Track {
    pub id: TrackId,
    pub element_type: ElementType,
    /// Ordered by frame index, at most one per frame.
    pub detections: Vec<Detection>,
    pub first_frame: u32,
    pub last_frame: u32,
    pub aggregated_confidence: f32,
    pub state: TrackState,
    /// Set when the track is closed having met the persistence invariant.
    pub confirmed: bool,
}

impl Track {
    fn start(id: TrackId, detection: Detection) -> Self {
        Self {
            id,
            element_type: detection.element_type,
            first_frame: detection.frame_index,
            last_frame: detection.frame_index,
            aggregated_confidence: detection.confidence,
            detections: vec![detection],
            state: TrackState::Tentative,
            confirmed: false,
        }
    }

    fn append(&mut self, detection: Detection, settings: &TrackerSettings) {
        self.last_frame = detection.frame_index;
        self.detections.push(detection);
        let confidences: Vec<f32> = self.detections.iter().map(|d| d.confidence).collect();
        self.aggregated_confidence = recency_weighted_confidence(&confidences, settings.weight_step);
        self.state = if self.meets_invariant(settings) {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Detections per frame of span.
    pub fn density(&self) -> f32 {
        self.len() as f32 / (self.last_frame - self.first_frame + 1) as f32
    }

    pub fn meets_invariant(&self, settings: &TrackerSettings) -> bool {
        is_confirmed(
            self.len(),
            self.first_frame,
            self.last_frame,
            self.aggregated_confidence,
            settings,
        )
    }

    /// Component-wise median of the track's boxes.
    pub fn representative_box(&self) -> BBox {
        let boxes: Vec<BBox> = self.detections.iter().map(|d| d.bbox).collect();
        median_box(&boxes).unwrap_or_default()
    }

    pub fn first_detection(&self) -> Option<&Detection> {
        self.detections.first()
    }

    fn last_box(&self) -> Option<&BBox> {
        self.detections.last().map(|d| &d.bbox)
    }
}

/// Weighted mean where detection `i` (oldest first) weighs `1 + i * step`.
pub fn recency_weighted_confidence(confidences: &[f32], step: f32) -> f32 {
    let (mut weighted, mut total) = (0f32, 0f32);
    for (i, c) in confidences.iter().enumerate() {
        let w = 1.0 + i as f32 * step;
        weighted += w * c;
        total += w;
    }
    if total <= 0.0 {
        return 0.0;
    }
    (weighted / total).clamp(0.0, 1.0)
}

/// The persistence invariant: enough detections, dense enough over their
/// span, confident enough on aggregate.
pub fn is_confirmed(
    count: usize,
    first_frame: u32,
    last_frame: u32,
    aggregated_confidence: f32,
    settings: &TrackerSettings,
) -> bool {
    if count == 0 || last_frame < first_frame {
        return false;
    }
    let span = (last_frame - first_frame) as f32 + 1.0;
    count >= settings.persist_n
        && count as f32 / span >= settings.min_density
        && aggregated_confidence >= settings.min_track_confidence
}

/// Result of closing a pass.
#[derive(Debug)]
pub struct TrackerOutcome {
    /// Confirmed tracks, in creation order.
    pub confirmed: Vec<Track>,
    /// Tracks that never met the invariant.
    pub discarded: usize,
}

pub struct DetectionTracker {
    settings: TrackerSettings,
    tracks: Vec<Track>,
    last_frame: Option<u32>,
}

impl DetectionTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            tracks: Vec::new(),
            last_frame: None,
        }
    }

    /// Feed all detections of one frame. Frames must arrive in strictly
    /// increasing index order.
    pub fn observe_frame(&mut self, frame_index: u32, detections: &[Detection]) -> Result<(), TrackerError> {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                return Err(TrackerError::OutOfOrder {
                    last,
                    got: frame_index,
                });
            }
        }
        self.last_frame = Some(frame_index);

        // Strongest detections claim tracks first.
        let mut ordered: Vec<&Detection> = detections.iter().collect();
        ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        for detection in ordered {
            let mut detection = detection.clone();
            detection.frame_index = frame_index;
            match self.nearest_open_track(&detection) {
                Some(idx) => self.tracks[idx].append(detection, &self.settings),
                None => {
                    let id = TrackId(self.tracks.len() as u32);
                    self.tracks.push(Track::start(id, detection));
                }
            }
        }
        Ok(())
    }

    fn nearest_open_track(&self, detection: &Detection) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, track) in self.tracks.iter().enumerate() {
            if track.element_type != detection.element_type
                || track.last_frame == detection.frame_index
                || track.state == TrackState::Closed
            {
                continue;
            }
            let Some(last_box) = track.last_box() else {
                continue;
            };
            let distance = last_box.center_distance(&detection.bbox);
            if distance > self.settings.max_tracking_distance {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id.0 as usize)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Close the pass: keep confirmed tracks, drop the rest.
    pub fn finish(self) -> TrackerOutcome {
        let total = self.tracks.len();
        let settings = self.settings;
        let confirmed: Vec<Track> = self
            .tracks
            .into_iter()
            .filter(|track| track.meets_invariant(&settings))
            .map(|mut track| {
                track.state = TrackState::Closed;
                track.confirmed = true;
                track
            })
            .collect();
        TrackerOutcome {
            discarded: total - confirmed.len(),
            confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn settings() -> TrackerSettings {
        PipelineConfig::default().tracker
    }

    fn det(element: ElementType, x: f32, confidence: f32) -> Detection {
        Detection::new(element, BBox::from_xywh(x, 100.0, 40.0, 40.0), confidence, 0)
    }

    #[test]
    fn recency_weighting_favours_later_detections() {
        let rising = recency_weighted_confidence(&[0.5, 0.9], 0.1);
        let falling = recency_weighted_confidence(&[0.9, 0.5], 0.1);
        assert!(rising > 0.7 && falling < 0.7);
        assert!((recency_weighted_confidence(&[0.8; 5], 0.1) - 0.8).abs() < 1e-6);
        assert_eq!(recency_weighted_confidence(&[], 0.1), 0.0);
    }

    #[test]
    fn confirmation_is_the_conjunction_of_its_conditions() {
        let s = settings();
        for count in 0..6usize {
            for span in 1..12u32 {
                for conf in [0.5f32, 0.65, 0.9] {
                    let expected = count >= s.persist_n
                        && count as f32 / span as f32 >= s.min_density
                        && conf >= s.min_track_confidence;
                    assert_eq!(is_confirmed(count, 10, 10 + span - 1, conf, &s), expected);
                }
            }
        }
    }

    #[test]
    fn single_frame_noise_is_never_confirmed() -> anyhow::Result<()> {
        let mut tracker = DetectionTracker::new(settings());
        tracker.observe_frame(0, &[det(ElementType::SignBoard, 100.0, 0.99)])?;
        for frame in 1..10 {
            tracker.observe_frame(frame, &[])?;
        }
        let outcome = tracker.finish();
        assert!(outcome.confirmed.is_empty());
        assert_eq!(outcome.discarded, 1);
        Ok(())
    }

    #[test]
    fn persistent_object_forms_one_confirmed_track() -> anyhow::Result<()> {
        let mut tracker = DetectionTracker::new(settings());
        for frame in 0..40 {
            let drift = frame as f32 * 0.5;
            tracker.observe_frame(frame, &[det(ElementType::SignBoard, 100.0 + drift, 0.9)])?;
        }
        let outcome = tracker.finish();
        assert_eq!(outcome.confirmed.len(), 1);
        let track = &outcome.confirmed[0];
        assert_eq!((track.first_frame, track.last_frame), (0, 39));
        assert_eq!(track.len(), 40);
        assert_eq!(track.state, TrackState::Closed);
        assert!(track.confirmed);
        assert!(track.first_frame <= track.last_frame);
        Ok(())
    }

    #[test]
    fn types_and_distance_separate_tracks() -> anyhow::Result<()> {
        let mut tracker = DetectionTracker::new(settings());
        for frame in 0..3 {
            tracker.observe_frame(
                frame,
                &[
                    det(ElementType::SignBoard, 100.0, 0.9),
                    det(ElementType::Guardrail, 100.0, 0.9),
                    det(ElementType::SignBoard, 500.0, 0.9),
                ],
            )?;
        }
        assert_eq!(tracker.tracks().len(), 3);
        assert!(tracker.tracks().iter().all(|t| t.len() == 3));
        assert_eq!(tracker.get(TrackId(2)).map(|t| t.element_type), Some(ElementType::SignBoard));
        Ok(())
    }

    #[test]
    fn one_detection_per_track_per_frame() -> anyhow::Result<()> {
        let mut tracker = DetectionTracker::new(settings());
        tracker.observe_frame(
            0,
            &[det(ElementType::RoadStud, 100.0, 0.9), det(ElementType::RoadStud, 110.0, 0.8)],
        )?;
        assert_eq!(tracker.tracks().len(), 2);
        Ok(())
    }

    #[test]
    fn sparse_track_fails_density() -> anyhow::Result<()> {
        let mut tracker = DetectionTracker::new(settings());
        for frame in [0u32, 10, 20, 30] {
            tracker.observe_frame(frame, &[det(ElementType::Divider, 100.0, 0.9)])?;
        }
        assert!(tracker.finish().confirmed.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_out_of_order_frames() -> anyhow::Result<()> {
        let mut tracker = DetectionTracker::new(settings());
        tracker.observe_frame(5, &[])?;
        assert_eq!(
            tracker.observe_frame(5, &[]),
            Err(TrackerError::OutOfOrder { last: 5, got: 5 })
        );
        Ok(())
    }
}
