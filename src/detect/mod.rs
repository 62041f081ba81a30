//! Object detection: backend seam, tracking, output normalization, result types.

mod adapter;
mod backend;
pub mod backends;
mod result;
mod tracker;

use std::path::PathBuf;

use thiserror::Error;

pub use adapter::{normalize, suppress, DetectionAdapter};
pub use backend::{DetectorBackend, InferenceConfig};
pub use backends::{load, ModelSpec, StubBackend};
pub use result::{BoundingBox, Detection, LabelVocabulary, RawDetection};
pub use tracker::{IouTracker, TrackerConfig, TrackingBackend};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("model weights not found at {}", path.display())]
    ModelMissing { path: PathBuf },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
