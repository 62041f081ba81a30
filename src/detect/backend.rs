use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{LabelVocabulary, RawDetection};

/// Parameters handed to the detector on every call.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Suppress overlapping boxes across classes, not only within a class.
    pub class_agnostic: bool,
    /// Keep tracker state between calls.
    pub persist_tracks: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            iou_threshold: 0.6,
            class_agnostic: true,
            persist_tracks: true,
        }
    }
}

/// Tracked object detector.
///
/// The pipeline treats implementations as opaque: given an enhanced frame, a
/// backend returns the objects it sees with an optional track identity. Output
/// is normalized by [`crate::detect::DetectionAdapter`], so a backend may
/// return boxes outside the frame, unknown classes or duplicates.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class vocabulary, resolved once at load time.
    fn vocabulary(&self) -> &LabelVocabulary;

    /// Run detection (and tracking, when the backend has a tracker) on a frame.
    fn infer_and_track(
        &mut self,
        frame: &RgbImage,
        config: &InferenceConfig,
    ) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
