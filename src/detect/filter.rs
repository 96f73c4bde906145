//! Post-filters applied to raw backend output.

use crate::config::DetectorSettings;

use super::result::Detection;

/// Drop detections below their class threshold, below the minimum box area,
/// or touching the frame border without clearing the penalised threshold.
pub fn apply_confidence_rules(
    detections: Vec<Detection>,
    settings: &DetectorSettings,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|det| {
            if det.bbox.area() < settings.min_bbox_area {
                return false;
            }
            let mut threshold = settings.threshold_for(det.element_type);
            if det
                .bbox
                .touches_border(frame_width, frame_height, settings.edge_margin)
            {
                threshold = (threshold * settings.edge_penalty).min(1.0);
            }
            det.confidence >= threshold
        })
        .collect()
}

/// Class-wise greedy non-maximum suppression, strongest first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    sort_by_confidence(&mut detections);
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept.iter().any(|k| {
            k.element_type == det.element_type && k.bbox.iou(&det.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

/// Keep the `n` most confident detections, strongest first.
pub fn keep_top_n(mut detections: Vec<Detection>, n: usize) -> Vec<Detection> {
    sort_by_confidence(&mut detections);
    detections.truncate(n);
    detections
}

fn sort_by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detect::ElementType;
    use crate::geometry::BBox;

    fn det(element: ElementType, x: f32, y: f32, size: f32, confidence: f32) -> Detection {
        Detection::new(element, BBox::from_xywh(x, y, size, size), confidence, 0)
    }

    #[test]
    fn class_thresholds_differ_per_element() {
        let settings = PipelineConfig::default().detector;
        let kept = apply_confidence_rules(
            vec![
                det(ElementType::SignBoard, 100.0, 100.0, 40.0, 0.75),
                det(ElementType::PavementDefect, 200.0, 100.0, 40.0, 0.40),
            ],
            &settings,
            640,
            360,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].element_type, ElementType::PavementDefect);
    }

    #[test]
    fn border_boxes_need_more_confidence() {
        let settings = PipelineConfig::default().detector;
        // Lane marking threshold 0.60, border threshold 0.72.
        let inner = det(ElementType::LaneMarking, 100.0, 100.0, 40.0, 0.65);
        let edge = det(ElementType::LaneMarking, 2.0, 100.0, 40.0, 0.65);
        let strong_edge = det(ElementType::LaneMarking, 2.0, 200.0, 40.0, 0.75);
        let kept = apply_confidence_rules(vec![inner, edge, strong_edge], &settings, 640, 360);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|d| d.bbox.x1 == 100.0 || d.confidence == 0.75));
    }

    #[test]
    fn tiny_boxes_are_dropped() {
        let settings = PipelineConfig::default().detector;
        let kept = apply_confidence_rules(
            vec![det(ElementType::PavementDefect, 50.0, 50.0, 9.0, 0.99)],
            &settings,
            640,
            360,
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn nms_is_class_wise() {
        let kept = non_max_suppression(
            vec![
                det(ElementType::SignBoard, 10.0, 10.0, 50.0, 0.7),
                det(ElementType::SignBoard, 12.0, 12.0, 50.0, 0.9),
                det(ElementType::Guardrail, 12.0, 12.0, 50.0, 0.8),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].element_type, ElementType::Guardrail);
    }

    #[test]
    fn top_n_keeps_strongest() {
        let dets: Vec<Detection> = (0..20)
            .map(|i| det(ElementType::RoadStud, i as f32 * 30.0, 0.0, 20.0, i as f32 / 20.0))
            .collect();
        let kept = keep_top_n(dets, 15);
        assert_eq!(kept.len(), 15);
        assert_eq!(kept[0].confidence, 19.0 / 20.0);
        assert_eq!(kept[14].confidence, 5.0 / 20.0);
    }
}
