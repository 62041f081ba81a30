use std::path::{Path, PathBuf};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::LabelVocabulary;
use crate::detect::tracker::{TrackerConfig, TrackingBackend};
use crate::detect::DetectError;

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Model paths starting with this prefix select the scripted stub backend.
pub const STUB_SCHEME: &str = "stub://";

/// What to load and how to label its output.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub model_path: PathBuf,
    pub labels: LabelVocabulary,
    /// Network input as (width, height).
    pub input_size: (u32, u32),
    pub tracker: TrackerConfig,
}

impl ModelSpec {
    pub fn is_stub(&self) -> bool {
        self.model_path.to_string_lossy().starts_with(STUB_SCHEME)
    }
}

/// Load the backend named by `model`.
///
/// Missing weights are reported as [`DetectError::ModelMissing`] before any
/// backend code runs.
pub fn load(model: &ModelSpec) -> Result<Box<dyn DetectorBackend>, DetectError> {
    if model.is_stub() {
        log::info!("using stub detector ({} classes)", model.labels.len());
        return Ok(Box::new(StubBackend::new(model.labels.clone())));
    }

    if !model.model_path.is_file() {
        return Err(DetectError::ModelMissing {
            path: model.model_path.clone(),
        });
    }

    load_weights(&model.model_path, model)
}

#[cfg(feature = "backend-tract")]
fn load_weights(path: &Path, model: &ModelSpec) -> Result<Box<dyn DetectorBackend>, DetectError> {
    use anyhow::Context;

    let (width, height) = model.input_size;
    let backend = TractBackend::new(path, width, height, model.labels.clone())
        .with_context(|| format!("failed to load detector from {}", path.display()))?;
    log::info!(
        "loaded tract detector from {} ({}x{}, {} classes)",
        path.display(),
        width,
        height,
        model.labels.len()
    );
    Ok(Box::new(TrackingBackend::new(
        Box::new(backend),
        model.tracker.clone(),
    )))
}

#[cfg(not(feature = "backend-tract"))]
fn load_weights(path: &Path, _model: &ModelSpec) -> Result<Box<dyn DetectorBackend>, DetectError> {
    Err(anyhow::anyhow!("no inference backend compiled in")
        .context(format!(
            "cannot load {}: rebuild with --features backend-tract",
            path.display()
        ))
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(path: &str) -> ModelSpec {
        ModelSpec {
            model_path: PathBuf::from(path),
            labels: LabelVocabulary::new(["AA", "AAA"]),
            input_size: (640, 640),
            tracker: TrackerConfig::default(),
        }
    }

    #[test]
    fn stub_scheme_selects_stub_backend() {
        let backend = load(&model("stub://batteries")).expect("stub loads");
        assert_eq!(backend.name(), "stub");
        assert_eq!(backend.vocabulary().len(), 2);
    }

    #[test]
    fn missing_weights_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("best.onnx");
        let err = load(&model(path.to_str().expect("utf8 path")))
            .err()
            .expect("load must fail");
        match err {
            DetectError::ModelMissing { path: missing } => assert_eq!(missing, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
