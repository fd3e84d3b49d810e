//! Defect detection.
//!
//! `DetectionEngine` turns one frame into an annotated render and a
//! `DetectionBatch`. The model itself sits behind the `InferenceRuntime` seam;
//! everything after the forward pass (decode, clamp, suppression, render) is
//! plain Rust in this module.

mod backend;
pub mod backends;
mod classes;
mod decode;
mod engine;
mod error;
mod render;
mod result;
mod simulate;
mod suppress;

pub use backend::{InferenceRuntime, ModelInfo};
pub use classes::{ClassTable, DefectClass};
pub use decode::{decode_predictions, DecodeParams};
pub use engine::{
    ChannelOrder, DetectionEngine, EngineOptions, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD,
};
pub use error::DetectionError;
pub use render::annotate;
pub use result::{
    BoundingBox, Detection, DetectionAnalysis, DetectionBatch, CRITICAL_CONFIDENCE,
};
pub use simulate::{simulated_detection, SIMULATED_CLASS};
pub use suppress::{suppress, SuppressionMode};
