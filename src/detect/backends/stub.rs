use std::collections::VecDeque;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, InferenceConfig};
use crate::detect::result::{LabelVocabulary, RawDetection};

/// Scripted backend for tests and `stub://` model paths.
///
/// Each call pops the next scripted batch. An exhausted script returns the
/// `idle` batch, empty by default.
pub struct StubBackend {
    vocabulary: LabelVocabulary,
    script: VecDeque<Vec<RawDetection>>,
    idle: Vec<RawDetection>,
    calls: u64,
}

impl StubBackend {
    pub fn new(vocabulary: LabelVocabulary) -> Self {
        Self {
            vocabulary,
            script: VecDeque::new(),
            idle: Vec::new(),
            calls: 0,
        }
    }

    pub fn with_script(mut self, batches: Vec<Vec<RawDetection>>) -> Self {
        self.script = batches.into();
        self
    }

    /// Batch returned once the script runs out.
    pub fn with_idle(mut self, idle: Vec<RawDetection>) -> Self {
        self.idle = idle;
        self
    }

    pub fn push(&mut self, batch: Vec<RawDetection>) {
        self.script.push_back(batch);
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    fn infer_and_track(
        &mut self,
        _frame: &RgbImage,
        _config: &InferenceConfig,
    ) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| self.idle.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_then_idle() -> Result<()> {
        let mut backend = StubBackend::new(LabelVocabulary::new(["AA"]))
            .with_script(vec![vec![RawDetection::new([0.0, 0.0, 1.0, 1.0], 0, 0.9)]])
            .with_idle(vec![
                RawDetection::new([0.0, 0.0, 2.0, 2.0], 0, 0.5),
                RawDetection::new([4.0, 4.0, 6.0, 6.0], 0, 0.5),
            ]);
        let frame = RgbImage::new(8, 8);
        let config = InferenceConfig::default();

        assert_eq!(backend.infer_and_track(&frame, &config)?.len(), 1);
        assert_eq!(backend.infer_and_track(&frame, &config)?.len(), 2);
        assert_eq!(backend.infer_and_track(&frame, &config)?.len(), 2);
        assert_eq!(backend.calls(), 3);
        Ok(())
    }
}
