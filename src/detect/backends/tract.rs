#![cfg(feature = "backend-tract")]

use std::path::Path;

use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceRuntime, ModelInfo};
use crate::detect::DetectionError;

/// Tract-based runtime for ONNX detection models.
///
/// Loads a local model file with a fixed `[1, 3, size, size]` input and runs it
/// on the CPU. The plan is immutable after loading, so one instance serves
/// concurrent requests.
pub struct TractRuntime {
    model: TypedRunnableModel<TypedModel>,
    info: ModelInfo,
}

impl TractRuntime {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load(model_path: &Path, input_size: usize) -> Result<Self, DetectionError> {
        let load_error = |reason: String| DetectionError::ModelLoad {
            path: model_path.to_path_buf(),
            reason,
        };

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|err| load_error(format!("parse: {err}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, input_size, input_size)),
            )
            .map_err(|err| load_error(format!("set input fact: {err}")))?
            .into_optimized()
            .map_err(|err| load_error(format!("optimize: {err}")))?;

        let input_name = outlet_name(&model, model.input_outlets())
            .unwrap_or_else(|| "images".to_string());
        let output_name = outlet_name(&model, model.output_outlets())
            .unwrap_or_else(|| "output0".to_string());

        let model = model
            .into_runnable()
            .map_err(|err| load_error(format!("build runnable plan: {err}")))?;

        log::info!(
            "tract: loaded {} (input {}, output {}, {}x{})",
            model_path.display(),
            input_name,
            output_name,
            input_size,
            input_size
        );

        Ok(Self {
            model,
            info: ModelInfo {
                input_name,
                output_name,
                input_shape: [1, 3, input_size, input_size],
            },
        })
    }
}

fn outlet_name(model: &TypedModel, outlets: TractResult<&[OutletId]>) -> Option<String> {
    let outlet = outlets.ok()?.first()?;
    Some(model.node(outlet.node).name.clone())
}

impl InferenceRuntime for TractRuntime {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectionError> {
        let shape = input.shape().to_vec();
        let data = input.as_standard_layout();
        let values = data
            .as_slice()
            .ok_or_else(|| DetectionError::InvalidInput("input tensor is not contiguous".into()))?;
        let tensor = Tensor::from_shape(&shape, values)
            .map_err(|err| DetectionError::InvalidInput(err.to_string()))?;

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|err| DetectionError::Inference(err.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectionError::Decode("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|err| DetectionError::Decode(format!("output tensor was not f32: {err}")))?;

        let output_shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();
        ArrayD::from_shape_vec(IxDyn(&output_shape), values)
            .map_err(|err| DetectionError::Decode(err.to_string()))
    }
}
