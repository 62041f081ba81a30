#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, InferenceConfig};
use crate::detect::result::{LabelVocabulary, RawDetection};

const CXYWH: usize = 4;

/// YOLOv8-style ONNX detector run through tract.
///
/// The model takes `[1, 3, H, W]` RGB in `0..1` and returns
/// `[1, 4 + classes, anchors]` with center-format boxes in input pixels.
/// Tract only detects; [`crate::detect::TrackingBackend`] adds track ids.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    vocabulary: LabelVocabulary,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        vocabulary: LabelVocabulary,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            vocabulary,
        })
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let resized;
        let pixels = if frame.dimensions() == (self.width, self.height) {
            frame
        } else {
            resized = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            &resized
        };

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| pixels.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &RgbImage,
        threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        if preds.ndim() != 3 {
            bail!("unexpected output shape {:?}", preds.shape());
        }
        let preds = preds
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;

        let shape = preds.shape();
        if shape[0] != 1 || shape[1] <= CXYWH {
            bail!("unexpected output shape {:?}", shape);
        }
        let classes = shape[1] - CXYWH;
        if classes != self.vocabulary.len() {
            log::debug!(
                "model reports {} classes, vocabulary has {}",
                classes,
                self.vocabulary.len()
            );
        }

        let sx = frame.width() as f32 / self.width as f32;
        let sy = frame.height() as f32 / self.height as f32;

        let mut detections = Vec::new();
        for anchor in 0..shape[2] {
            let (class_index, confidence) = (0..classes)
                .map(|c| (c, preds[[0, CXYWH + c, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !(confidence >= threshold) {
                continue;
            }

            let cx = preds[[0, 0, anchor]] * sx;
            let cy = preds[[0, 1, anchor]] * sy;
            let w = preds[[0, 2, anchor]] * sx;
            let h = preds[[0, 3, anchor]] * sy;
            detections.push(RawDetection::new(
                [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                class_index,
                confidence,
            ));
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    fn infer_and_track(
        &mut self,
        frame: &RgbImage,
        config: &InferenceConfig,
    ) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, config.confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.width, self.height);
        self.infer_and_track(&blank, &InferenceConfig::default())
            .map(|_| ())
    }
}
