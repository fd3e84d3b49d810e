use ndarray::{Array4, ArrayD};

use super::DetectionError;

/// Tensor names and input shape a runtime advertises after loading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub input_name: String,
    pub output_name: String,
    /// `[batch, channels, height, width]`.
    pub input_shape: [usize; 4],
}

impl ModelInfo {
    pub fn square(input_size: usize) -> Self {
        Self {
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
            input_shape: [1, 3, input_size, input_size],
        }
    }

    pub fn input_size(&self) -> (usize, usize) {
        (self.input_shape[3], self.input_shape[2])
    }
}

/// Inference runtime seam.
///
/// A runtime holds a read-only model handle and performs one forward pass per
/// call. It must be shareable across threads: detection requests from different
/// connections may run concurrently on blocking workers.
pub trait InferenceRuntime: Send + Sync {
    /// Runtime identifier for logs.
    fn name(&self) -> &'static str;

    fn model_info(&self) -> &ModelInfo;

    /// Forward pass over a `[1, 3, H, W]` input; returns the raw `[1, C, N]` output.
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectionError>;
}

/// Lets one loaded runtime back several engines.
impl<R: InferenceRuntime + ?Sized> InferenceRuntime for std::sync::Arc<R> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn model_info(&self) -> &ModelInfo {
        (**self).model_info()
    }

    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectionError> {
        (**self).run(input)
    }
}
