use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::SuppressionMode;

const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8000";
#[cfg(feature = "ingest-v4l2")]
const DEFAULT_CAMERA_DEVICE: &str = "v4l2";
#[cfg(not(feature = "ingest-v4l2"))]
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.4;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_JPEG_QUALITY: u8 = 75;
const DEFAULT_SQUARE_SIZE: u32 = 640;
const DEFAULT_QUEUE_DEPTH: usize = 4;
const DEFAULT_CAPTURES_DIR: &str = "./captures";
const DEFAULT_CAPTURE_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct InspectorConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    stream: Option<StreamConfigFile>,
    captures_dir: Option<PathBuf>,
    capture_jpeg_quality: Option<u8>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    suppression: Option<SuppressionMode>,
    class_labels: Option<Vec<String>>,
    simulate_without_model: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    fps: Option<u32>,
    jpeg_quality: Option<u8>,
    square_size: Option<u32>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub server_addr: String,
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub stream: StreamSettings,
    pub captures_dir: PathBuf,
    pub capture_jpeg_quality: u8,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device URI: `stub://...`, `v4l2` or a `/dev/video*` path.
    pub device: String,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub suppression: SuppressionMode,
    pub class_labels: Option<Vec<String>>,
    /// Produce a placeholder detection when no model is loaded.
    pub simulate_without_model: bool,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub fps: u32,
    pub jpeg_quality: u8,
    pub square_size: u32,
    pub queue_depth: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        // An empty file section set always maps onto the defaults.
        Self::from_file(InspectorConfigFile::default())
    }
}

impl InspectorConfig {
    /// Load from `VRS_CONFIG` (JSON) if set, then apply `VRS_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VRS_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config path (the `--config` flag).
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InspectorConfigFile) -> Self {
        let server_addr = file
            .server
            .and_then(|server| server.addr)
            .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());
        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            index: camera.index.unwrap_or(DEFAULT_CAMERA_INDEX),
            width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };
        let model = file.model.unwrap_or_default();
        let model = ModelSettings {
            path: model.path,
            confidence_threshold: model
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: model.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            suppression: model.suppression.unwrap_or_default(),
            class_labels: model.class_labels,
            simulate_without_model: model.simulate_without_model.unwrap_or(false),
        };
        let stream = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            fps: stream.fps.unwrap_or(DEFAULT_STREAM_FPS),
            jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_STREAM_JPEG_QUALITY),
            square_size: stream.square_size.unwrap_or(DEFAULT_SQUARE_SIZE),
            queue_depth: stream.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
        };
        Self {
            server_addr,
            camera,
            model,
            stream,
            captures_dir: file
                .captures_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURES_DIR)),
            capture_jpeg_quality: file
                .capture_jpeg_quality
                .unwrap_or(DEFAULT_CAPTURE_JPEG_QUALITY),
            font_path: file.font_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("VRS_SERVER_ADDR") {
            self.server_addr = addr;
        }
        if let Some(device) = env_string("VRS_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(index) = env_parsed::<u32>("VRS_CAMERA_INDEX")? {
            self.camera.index = index;
        }
        if let Some(width) = env_parsed::<u32>("VRS_CAMERA_WIDTH")? {
            self.camera.width = width;
        }
        if let Some(height) = env_parsed::<u32>("VRS_CAMERA_HEIGHT")? {
            self.camera.height = height;
        }
        if let Some(fps) = env_parsed::<u32>("VRS_CAMERA_FPS")? {
            self.camera.fps = fps;
        }
        if let Some(path) = env_string("VRS_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(threshold) = env_parsed::<f32>("VRS_CONFIDENCE_THRESHOLD")? {
            self.model.confidence_threshold = threshold;
        }
        if let Some(threshold) = env_parsed::<f32>("VRS_IOU_THRESHOLD")? {
            self.model.iou_threshold = threshold;
        }
        if let Some(dir) = env_string("VRS_CAPTURES_DIR") {
            self.captures_dir = PathBuf::from(dir);
        }
        if let Some(simulate) = env_string("VRS_SIMULATE_DETECTIONS") {
            self.model.simulate_without_model = parse_flag(&simulate).ok_or_else(|| {
                anyhow!("VRS_SIMULATE_DETECTIONS must be one of 1/0/true/false/yes/no")
            })?;
        }
        if let Some(path) = env_string("VRS_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.stream.fps == 0 {
            return Err(anyhow!("stream fps must be greater than zero"));
        }
        if self.stream.square_size == 0 || self.model.input_size == 0 {
            return Err(anyhow!("square size and model input size must be greater than zero"));
        }
        if self.stream.queue_depth == 0 {
            return Err(anyhow!("stream queue depth must be greater than zero"));
        }
        validate_unit("confidence_threshold", self.model.confidence_threshold)?;
        validate_unit("iou_threshold", self.model.iou_threshold)?;
        validate_quality("stream jpeg_quality", self.stream.jpeg_quality)?;
        validate_quality("capture_jpeg_quality", self.capture_jpeg_quality)?;
        if let Some(labels) = &self.model.class_labels {
            if labels.is_empty() {
                return Err(anyhow!("class_labels must not be empty when set"));
            }
        }
        Ok(())
    }
}

fn validate_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn validate_quality(name: &str, value: u8) -> Result<()> {
    if !(1..=100).contains(&value) {
        return Err(anyhow!("{} must be within 1..=100, got {}", name, value));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<InspectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value: {}", key, raw)),
        None => Ok(None),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = InspectorConfig::default();
        assert_eq!(cfg.server_addr, "0.0.0.0:8000");
        assert_eq!(cfg.camera.width, 640);
        assert_eq!(cfg.camera.height, 480);
        assert_eq!(cfg.camera.fps, 30);
        assert_eq!(cfg.model.confidence_threshold, 0.5);
        assert_eq!(cfg.model.iou_threshold, 0.4);
        assert_eq!(cfg.model.suppression, SuppressionMode::ClassAgnostic);
        assert!(!cfg.model.simulate_without_model);
        assert_eq!(cfg.stream.fps, 10);
        assert_eq!(cfg.stream.jpeg_quality, 75);
        assert_eq!(cfg.capture_jpeg_quality, 80);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" no "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
