use anyhow::Context;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::backend::{InferenceRuntime, ModelInfo};
use super::classes::ClassTable;
use super::decode::{decode_predictions, DecodeParams};
use super::render::annotate;
use super::result::DetectionBatch;
use super::suppress::{suppress, SuppressionMode};
use super::DetectionError;
use crate::overlay::TextRenderer;

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;

/// Channel order the model was trained on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub input_size: u32,
    pub channel_order: ChannelOrder,
    pub suppression: SuppressionMode,
    pub classes: ClassTable,
    pub text: TextRenderer,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            channel_order: ChannelOrder::Rgb,
            suppression: SuppressionMode::ClassAgnostic,
            classes: ClassTable::pcb_defaults(),
            text: TextRenderer::disabled(),
        }
    }
}

/// Loaded detection model plus the decode/suppress/render pipeline around it.
///
/// Holds no per-call state; `detect` may run concurrently from several threads.
pub struct DetectionEngine {
    runtime: Box<dyn InferenceRuntime>,
    options: EngineOptions,
    model_path: Option<PathBuf>,
}

impl std::fmt::Debug for DetectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionEngine")
            .field("runtime", &self.runtime.name())
            .field("model_info", self.runtime.model_info())
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl DetectionEngine {
    /// Load an ONNX model from disk.
    pub fn load(model_path: &Path, options: EngineOptions) -> Result<Self, DetectionError> {
        if !model_path.exists() {
            return Err(DetectionError::ModelNotFound {
                path: model_path.to_path_buf(),
            });
        }
        let runtime = load_runtime(model_path, options.input_size)?;
        let mut engine = Self::with_runtime(runtime, options);
        engine.model_path = Some(model_path.to_path_buf());
        Ok(engine)
    }

    /// Wrap an already-constructed runtime.
    pub fn with_runtime(runtime: Box<dyn InferenceRuntime>, options: EngineOptions) -> Self {
        let info = runtime.model_info();
        log::info!(
            "detection engine ready: runtime={} input={} output={} shape={:?}",
            runtime.name(),
            info.input_name,
            info.output_name,
            info.input_shape
        );
        Self {
            runtime,
            options,
            model_path: None,
        }
    }

    pub fn model_info(&self) -> &ModelInfo {
        self.runtime.model_info()
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn classes(&self) -> &ClassTable {
        &self.options.classes
    }

    /// Run the full pipeline on one frame: preprocess, infer, decode, clamp,
    /// suppress, render.
    pub fn detect(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<(RgbImage, DetectionBatch), DetectionError> {
        for (name, value) in [
            ("confidence_threshold", confidence_threshold),
            ("iou_threshold", iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectionError::InvalidInput(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectionError::InvalidInput("frame has no pixels".into()));
        }

        let (input_w, input_h) = self.model_info().input_size();
        let input = self.preprocess(image, input_w as u32, input_h as u32);
        let output = self.runtime.run(input)?;

        let candidates = decode_predictions(
            &output,
            &self.options.classes,
            DecodeParams {
                confidence_threshold,
                input_size: (input_w as u32, input_h as u32),
                image_size: image.dimensions(),
            },
        )?;
        let candidate_count = candidates.len();
        let detections = suppress(candidates, iou_threshold, self.options.suppression);
        log::debug!(
            "detection: {} candidates, {} kept after suppression",
            candidate_count,
            detections.len()
        );

        let annotated = annotate(image, &detections, &self.options.text);
        Ok((annotated, DetectionBatch::from_detections(detections)))
    }

    /// Offline detection on an image file.
    pub fn detect_file(
        &self,
        path: &Path,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> anyhow::Result<(RgbImage, DetectionBatch)> {
        let image = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?
            .to_rgb8();
        let result = self.detect(&image, confidence_threshold, iou_threshold)?;
        Ok(result)
    }

    fn preprocess(&self, image: &RgbImage, width: u32, height: u32) -> Array4<f32> {
        let resized;
        let source = if image.dimensions() == (width, height) {
            image
        } else {
            resized = imageops::resize(image, width, height, FilterType::Triangle);
            &resized
        };
        let order = self.options.channel_order;
        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let pixel = source.get_pixel(x as u32, y as u32);
                let index = match order {
                    ChannelOrder::Rgb => channel,
                    ChannelOrder::Bgr => 2 - channel,
                };
                pixel.0[index] as f32 / 255.0
            },
        )
    }
}

#[cfg(feature = "backend-tract")]
fn load_runtime(path: &Path, input_size: u32) -> Result<Box<dyn InferenceRuntime>, DetectionError> {
    let runtime = super::backends::TractRuntime::load(path, input_size as usize)?;
    Ok(Box::new(runtime))
}

#[cfg(not(feature = "backend-tract"))]
fn load_runtime(path: &Path, _input_size: u32) -> Result<Box<dyn InferenceRuntime>, DetectionError> {
    Err(DetectionError::ModelLoad {
        path: path.to_path_buf(),
        reason: "built without the backend-tract feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{Candidate, FixedOutputRuntime};
    use std::sync::Arc;

    fn engine(candidates: &[Candidate]) -> DetectionEngine {
        DetectionEngine::with_runtime(
            Box::new(FixedOutputRuntime::from_candidates(64, 8, candidates)),
            EngineOptions {
                input_size: 64,
                ..EngineOptions::default()
            },
        )
    }

    #[test]
    fn thresholds_outside_unit_range_are_rejected() {
        let engine = engine(&[]);
        let image = RgbImage::new(8, 8);
        assert!(matches!(
            engine.detect(&image, 1.5, 0.4),
            Err(DetectionError::InvalidInput(_))
        ));
    }

    #[test]
    fn bgr_models_see_swapped_channels() {
        let mut engine = engine(&[]);
        engine.options.channel_order = ChannelOrder::Bgr;
        let image = RgbImage::from_pixel(64, 64, image::Rgb([255, 0, 0]));
        let input = engine.preprocess(&image, 64, 64);
        assert_eq!(input[[0, 0, 0, 0]], 0.0);
        assert_eq!(input[[0, 2, 0, 0]], 1.0);
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        let engine = Arc::new(engine(&[Candidate {
            cx: 32.0,
            cy: 32.0,
            w: 16.0,
            h: 16.0,
            class_id: 6,
            score: 0.9,
        }]));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    let image = RgbImage::new(128, 128);
                    engine.detect(&image, 0.5, 0.4).map(|(_, batch)| batch.len())
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("thread").expect("detect"), 1);
        }
    }
}
