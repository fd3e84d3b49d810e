//! Client message schema.
//!
//! Every message is a JSON object with a `type` discriminator. Inbound payloads
//! are decoded once into `InboundMessage` and matched exhaustively; outbound
//! messages are serialized once per send (or once per pass for frames) into a
//! shared `Arc<str>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::detect::DetectionAnalysis;
use crate::frame::FrameInfo;
use crate::service::{CaptureOutcome, DetectionReport, DetectionStatus};

const INBOUND_KINDS: &[&str] = &["capture_image", "get_status", "ping", "set_detection"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("message has no \"type\" field")]
    MissingKind,
    #[error("unknown message type {0:?}")]
    UnknownKind(String),
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    CaptureImage {
        #[serde(default)]
        request_id: Option<Value>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default = "default_true")]
        enable_detection: bool,
    },
    GetStatus {
        #[serde(default)]
        request_id: Option<Value>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    SetDetection {
        #[serde(default)]
        request_id: Option<Value>,
        /// Absent means flip the current setting.
        #[serde(default)]
        enabled: Option<bool>,
    },
}

pub fn decode_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingKind)?;
    if !INBOUND_KINDS.contains(&kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|err| ProtocolError::Malformed(err.to_string()))
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connection {
        status: &'static str,
        client_id: String,
        server_time: f64,
        camera_status: FrameInfo,
    },
    VideoFrame {
        /// Base64 JPEG of the square-normalised frame.
        data: String,
        timestamp: f64,
        frame_info: FrameInfo,
    },
    CameraStatus {
        status: &'static str,
        message: String,
        timestamp: f64,
    },
    CaptureResponse {
        request_id: Option<Value>,
        success: bool,
        message: String,
        filepath: Option<String>,
        image_data: Option<String>,
        detection_results: Option<DetectionReport>,
        analysis: Option<DetectionAnalysis>,
        timestamp: f64,
    },
    StatusResponse {
        request_id: Option<Value>,
        camera_info: FrameInfo,
        detection_status: DetectionStatus,
        connections: usize,
        streaming: bool,
        server_time: f64,
    },
    Pong {
        timestamp: f64,
        client_timestamp: Option<Value>,
        client_id: String,
    },
    DetectionSettingResponse {
        request_id: Option<Value>,
        success: bool,
        enabled: bool,
        detection_status: DetectionStatus,
        message: String,
        timestamp: f64,
    },
}

impl OutboundMessage {
    pub fn capture_response(request_id: Option<Value>, outcome: CaptureOutcome, timestamp: f64) -> Self {
        OutboundMessage::CaptureResponse {
            request_id,
            success: outcome.success,
            message: outcome.message,
            filepath: outcome.filepath,
            image_data: outcome.image_data,
            detection_results: outcome.detection_results,
            analysis: outcome.analysis,
            timestamp,
        }
    }

    pub fn waiting(timestamp: f64) -> Self {
        OutboundMessage::CameraStatus {
            status: "waiting",
            message: "Waiting for camera frames".to_string(),
            timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Connection { .. } => "connection",
            OutboundMessage::VideoFrame { .. } => "video_frame",
            OutboundMessage::CameraStatus { .. } => "camera_status",
            OutboundMessage::CaptureResponse { .. } => "capture_response",
            OutboundMessage::StatusResponse { .. } => "status_response",
            OutboundMessage::Pong { .. } => "pong",
            OutboundMessage::DetectionSettingResponse { .. } => "detection_setting_response",
        }
    }

    /// Serialize once for delivery to any number of connections.
    pub fn to_payload(&self) -> Arc<str> {
        match serde_json::to_string(self) {
            Ok(json) => Arc::from(json),
            Err(err) => {
                // Unreachable for these field types; degrade to an error notice.
                log::error!("failed to serialize {} message: {}", self.kind(), err);
                Arc::from(format!(r#"{{"type":"error","message":"failed to encode {}"}}"#, self.kind()))
            }
        }
    }
}
