#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::config::DetectorSettings;
use crate::detect::backend::ElementDetector;
use crate::detect::filter::{apply_confidence_rules, keep_top_n, non_max_suppression};
use crate::detect::result::{Detection, ElementType};
use crate::error::DetectorError;
use crate::frame::Frame;
use crate::geometry::BBox;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` (or its
/// transpose) holding centre-format boxes in model-input pixels followed by
/// per-class scores. The model is loaded once; inference takes `&self`.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    classes: Vec<Option<ElementType>>,
    settings: DetectorSettings,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, settings: &DetectorSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let classes = settings
            .class_names
            .iter()
            .map(|name| match name.parse::<ElementType>() {
                Ok(element) => Some(element),
                Err(_) => {
                    log::warn!("TractDetector: model class '{}' has no element type, ignoring", name);
                    None
                }
            })
            .collect();

        log::info!(
            "TractDetector: loaded {} ({}x{} input, {} classes)",
            model_path.display(),
            size,
            size,
            settings.class_names.len()
        );
        Ok(Self {
            model,
            input_size: settings.input_size,
            classes,
            settings: settings.clone(),
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let size = self.input_size;
        let resized = imageops::resize(frame.pixels(), size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;
        let (_, d1, d2) = view.dim();
        let channels_first = d1 <= d2;
        let (channels, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };
        if channels <= 4 {
            return Err(anyhow!("model output has {} channels, expected 4 + classes", channels));
        }
        let at = |c: usize, i: usize| {
            if channels_first {
                view[[0, c, i]]
            } else {
                view[[0, i, c]]
            }
        };

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for i in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 4..channels {
                let score = at(c, i);
                if score > best.1 {
                    best = (c - 4, score);
                }
            }
            let (class_idx, score) = best;
            if !(score >= self.settings.base_confidence) {
                continue;
            }
            let Some(Some(element)) = self.classes.get(class_idx) else {
                continue;
            };
            let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
            let bbox = BBox::new(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            )
            .clamp_to(frame.width(), frame.height());
            if bbox.is_degenerate() {
                continue;
            }
            detections.push(Detection::new(*element, bbox, score, frame.index));
        }
        Ok(detections)
    }
}

impl ElementDetector for TractDetector {
    fn name(&self) -> &'static str {
        "neural"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let run = || -> Result<Vec<Detection>> {
            let input = self.build_input(frame)?;
            let outputs = self
                .model
                .run(tvec!(input.into()))
                .context("ONNX inference failed")?;
            self.decode(outputs, frame)
        };
        let raw = run().map_err(|e| DetectorError::Inference(format!("{e:#}")))?;
        let filtered = apply_confidence_rules(raw, &self.settings, frame.width(), frame.height());
        let filtered = non_max_suppression(filtered, self.settings.nms_iou);
        Ok(keep_top_n(filtered, self.settings.top_n))
    }
}
