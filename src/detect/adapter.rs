use anyhow::{Context, Result};
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, InferenceConfig};
use crate::detect::result::{BoundingBox, Detection, LabelVocabulary, RawDetection};

/// Calls a [`DetectorBackend`] and turns its output into [`Detection`]s.
///
/// Normalization, in order:
/// - drop boxes that are non-finite, inverted, or empty after clamping to the frame
/// - drop class indices outside the vocabulary
/// - drop confidences below the threshold (NaN included); clamp the rest to `[0, 1]`
/// - negative track ids become "unconfirmed"
/// - IoU suppression, across classes when `class_agnostic` is set
///
/// Unconfirmed detections are kept; they count like any other.
pub struct DetectionAdapter {
    backend: Box<dyn DetectorBackend>,
    config: InferenceConfig,
}

impl DetectionAdapter {
    pub fn new(backend: Box<dyn DetectorBackend>, config: InferenceConfig) -> Self {
        Self { backend, config }
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        self.backend.vocabulary()
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let raw = self
            .backend
            .infer_and_track(frame, &self.config)
            .with_context(|| format!("{} inference failed", self.backend.name()))?;
        Ok(normalize(
            raw,
            frame.dimensions(),
            &self.config,
            self.backend.vocabulary(),
        ))
    }
}

/// Validate raw detector output and apply suppression.
pub fn normalize(
    raw: Vec<RawDetection>,
    frame_size: (u32, u32),
    config: &InferenceConfig,
    vocabulary: &LabelVocabulary,
) -> Vec<Detection> {
    let (width, height) = frame_size;
    let candidates: Vec<Detection> = raw
        .into_iter()
        .filter_map(|det| {
            let [x1, y1, x2, y2] = det.bbox;
            let bbox = BoundingBox::new(x1, y1, x2, y2);
            if !bbox.is_valid() {
                return None;
            }
            let bbox = bbox.clamped(width, height);
            if !bbox.is_valid() {
                return None;
            }
            let label = vocabulary.label(det.class_index)?;
            if !(det.confidence >= config.confidence_threshold) {
                return None;
            }
            Some(Detection {
                track_id: det.track_id.and_then(|id| u64::try_from(id).ok()),
                class_label: label.to_string(),
                confidence: det.confidence.clamp(0.0, 1.0),
                bbox,
            })
        })
        .collect();

    suppress(candidates, config.iou_threshold, config.class_agnostic)
}

/// Greedy non-maximum suppression, highest confidence first.
///
/// A candidate is dropped when its IoU with an already kept box is above
/// `iou_threshold`. Without `class_agnostic`, only same-label pairs compete.
pub fn suppress(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    class_agnostic: bool,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            (class_agnostic || k.class_label == candidate.class_label)
                && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
