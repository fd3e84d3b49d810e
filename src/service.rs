//! Snapshot capture and status orchestration.
//!
//! `InspectionService` composes the frame source and the (optional) detection
//! engine. It owns the shared detection-enabled flag that connections toggle,
//! and answers capture requests with a response that always carries `success`
//! and a human-readable `message`.

use chrono::Local;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::{
    simulated_detection, DetectionAnalysis, DetectionBatch, DetectionEngine, DetectionError,
    Detection, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD,
};
use crate::encode::{encode_jpeg, to_base64};
use crate::frame::FrameInfo;
use crate::ingest::FrameSource;
use crate::overlay::TextRenderer;

#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub captures_dir: PathBuf,
    pub capture_jpeg_quality: u8,
    /// Side of the square frame that captures are detected on and saved as.
    pub square_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Produce a placeholder detection when no model is loaded.
    pub simulate_without_model: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            captures_dir: PathBuf::from("./captures"),
            capture_jpeg_quality: 80,
            square_size: 640,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            simulate_without_model: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionStatus {
    pub available: bool,
    pub enabled: bool,
    pub model_loaded: bool,
    pub simulation: bool,
}

/// Detection outcome as embedded in a capture response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetectionReport {
    Completed {
        detections: Vec<Detection>,
        num_defects: usize,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        simulated: bool,
    },
    Failed {
        error: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureOutcome {
    pub success: bool,
    pub message: String,
    pub filepath: Option<String>,
    /// Base64 JPEG of the saved image.
    pub image_data: Option<String>,
    pub detection_results: Option<DetectionReport>,
    pub analysis: Option<DetectionAnalysis>,
}

impl CaptureOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            filepath: None,
            image_data: None,
            detection_results: None,
            analysis: None,
        }
    }
}

pub struct InspectionService {
    frames: Arc<FrameSource>,
    engine: Option<Arc<DetectionEngine>>,
    detection_enabled: AtomicBool,
    options: ServiceOptions,
    text: TextRenderer,
}

impl InspectionService {
    pub fn new(
        frames: Arc<FrameSource>,
        engine: Option<DetectionEngine>,
        options: ServiceOptions,
        text: TextRenderer,
    ) -> Self {
        Self {
            frames,
            engine: engine.map(Arc::new),
            detection_enabled: AtomicBool::new(true),
            options,
            text,
        }
    }

    pub fn frames(&self) -> &Arc<FrameSource> {
        &self.frames
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn camera_info(&self) -> FrameInfo {
        self.frames.frame_info()
    }

    pub fn is_detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Acquire)
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::Release);
        log::info!("detection {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Flip the flag; returns the new value.
    pub fn toggle_detection(&self) -> bool {
        let enabled = !self.detection_enabled.fetch_xor(true, Ordering::AcqRel);
        log::info!("detection {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    pub fn is_model_loaded(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_detection_available(&self) -> bool {
        self.engine.is_some() || self.options.simulate_without_model
    }

    pub fn detection_status(&self) -> DetectionStatus {
        DetectionStatus {
            available: self.is_detection_available(),
            enabled: self.is_detection_enabled(),
            model_loaded: self.is_model_loaded(),
            simulation: self.engine.is_none() && self.options.simulate_without_model,
        }
    }

    /// Run detection on `image` with the configured thresholds.
    ///
    /// Returns `None` when no model is loaded and simulation is off.
    pub fn detect(
        &self,
        image: &RgbImage,
    ) -> Option<Result<(RgbImage, DetectionBatch, bool), DetectionError>> {
        match &self.engine {
            Some(engine) => Some(
                engine
                    .detect(image, self.options.confidence_threshold, self.options.iou_threshold)
                    .map(|(annotated, batch)| (annotated, batch, false)),
            ),
            None if self.options.simulate_without_model => {
                let (annotated, batch) = simulated_detection(image, &self.text);
                Some(Ok((annotated, batch, true)))
            }
            None => None,
        }
    }

    /// Save the latest frame, square-normalised and optionally annotated with
    /// detections.
    ///
    /// Detection only runs when both `apply_detection` and the shared flag are set.
    /// Failures are reported in the outcome, never returned as errors.
    pub fn capture(&self, filename: Option<&str>, apply_detection: bool) -> CaptureOutcome {
        let filename = match filename.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => match validate_filename(name) {
                Ok(name) => name.to_string(),
                Err(reason) => return CaptureOutcome::failed(reason),
            },
            None => default_capture_name(),
        };

        let Some(frame) = self.frames.current_frame() else {
            return CaptureOutcome::failed("No frame available");
        };
        // Same geometry as the stream, so box coordinates line up for clients.
        let mut image = frame.to_square(self.options.square_size).into_image();

        let mut detection_results = None;
        let mut analysis = None;
        if apply_detection && self.is_detection_enabled() {
            match self.detect(&image) {
                Some(Ok((annotated, batch, simulated))) => {
                    image = annotated;
                    analysis = Some(batch.analysis());
                    detection_results = Some(DetectionReport::Completed {
                        num_defects: batch.len(),
                        detections: batch.detections,
                        simulated,
                    });
                }
                Some(Err(err)) => {
                    log::warn!("capture: detection failed: {}", err);
                    detection_results = Some(DetectionReport::Failed {
                        error: err.to_string(),
                    });
                }
                None => {
                    detection_results = Some(DetectionReport::Failed {
                        error: "Detection model not available".to_string(),
                    });
                }
            }
        }

        let path = self.options.captures_dir.join(&filename);
        let bytes = match self.write_capture(&image, &path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("capture: failed to save {}: {:#}", path.display(), err);
                return CaptureOutcome::failed(format!("Failed to save image: {err}"));
            }
        };
        log::info!("capture: saved {} ({} bytes)", path.display(), bytes.len());

        let message = match &detection_results {
            Some(DetectionReport::Completed { num_defects, .. }) => {
                format!("Image captured successfully ({} defects detected)", num_defects)
            }
            _ => "Image captured successfully".to_string(),
        };
        CaptureOutcome {
            success: true,
            message,
            filepath: Some(path.display().to_string()),
            image_data: Some(to_base64(&bytes)),
            detection_results,
            analysis,
        }
    }

    fn write_capture(&self, image: &RgbImage, path: &Path) -> anyhow::Result<Vec<u8>> {
        std::fs::create_dir_all(&self.options.captures_dir)?;
        let bytes = encode_jpeg(image, self.options.capture_jpeg_quality)?;
        std::fs::write(path, &bytes)?;
        Ok(bytes)
    }
}

fn default_capture_name() -> String {
    Local::now().format("capture_%Y%m%d_%H%M%S.jpg").to_string()
}

/// Accept bare file names only; anything that could leave the captures
/// directory is rejected.
fn validate_filename(name: &str) -> Result<&str, String> {
    let bare = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n == name)
        .unwrap_or(false);
    if !bare || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(format!("Invalid filename: {name}"));
    }
    Ok(name)
}
