use ndarray::{Array3, Array4, ArrayD};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::detect::backend::{InferenceRuntime, ModelInfo};
use crate::detect::DetectionError;

/// One raw YOLO-style candidate in model-input coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: usize,
    pub score: f32,
}

/// Runtime that returns a preset output tensor for every forward pass.
///
/// Used for replaying recorded model output and for exercising the decode
/// path without a model file.
pub struct FixedOutputRuntime {
    info: ModelInfo,
    output: ArrayD<f32>,
    calls: AtomicU64,
}

impl FixedOutputRuntime {
    pub fn new(info: ModelInfo, output: ArrayD<f32>) -> Self {
        Self {
            info,
            output,
            calls: AtomicU64::new(0),
        }
    }

    /// Build a `[1, 4 + num_classes, N]` output holding `candidates`.
    pub fn from_candidates(input_size: usize, num_classes: usize, candidates: &[Candidate]) -> Self {
        let rows = 4 + num_classes;
        let mut output = Array3::<f32>::zeros((1, rows, candidates.len()));
        for (n, candidate) in candidates.iter().enumerate() {
            output[[0, 0, n]] = candidate.cx;
            output[[0, 1, n]] = candidate.cy;
            output[[0, 2, n]] = candidate.w;
            output[[0, 3, n]] = candidate.h;
            if candidate.class_id < num_classes {
                output[[0, 4 + candidate.class_id, n]] = candidate.score;
            }
        }
        Self::new(ModelInfo::square(input_size), output.into_dyn())
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl InferenceRuntime for FixedOutputRuntime {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectionError> {
        if input.shape() != self.info.input_shape.as_slice() {
            return Err(DetectionError::Inference(format!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.info.input_shape
            )));
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.output.clone())
    }
}
