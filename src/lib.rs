//! Visual Inspection Kernel
//!
//! This crate implements the concurrent frame pipeline behind a real-time
//! visual-inspection backend.
//!
//! # Architecture
//!
//! Frames flow through three components:
//!
//! 1. **Acquisition** (`ingest::FrameSource`): a dedicated thread reads the imaging
//!    device, mirrors and stamps each frame, and publishes it into a single-slot buffer.
//! 2. **Detection** (`detect::DetectionEngine`): on demand, a frame is run through an
//!    inference runtime and the raw output is decoded, clamped and suppressed into
//!    defect detections.
//! 3. **Broadcast** (`broadcast::StreamBroadcaster`): while at least one client is
//!    attached, a cooperative loop pushes the latest frame to every connection.
//!
//! The delivery model is lossy by construction: only the latest frame is retained,
//! and a slow consumer silently misses intermediate frames.
//!
//! # Module Structure
//!
//! - `frame`: Frame model, single-slot publication buffer, square normalisation
//! - `ingest`: Imaging devices and the acquisition loop
//! - `detect`: Inference runtimes, decoding, suppression, rendering
//! - `broadcast`: Connections, message schema, broadcast loop
//! - `service`: Snapshot capture and status orchestration
//! - `api`: HTTP and WebSocket surface
//! - `config`: File + environment configuration

use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod broadcast;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod service;

pub use broadcast::{
    BroadcastOptions, Connection, ConnectionId, InboundMessage, OutboundMessage,
    StreamBroadcaster, StreamState,
};
pub use detect::{
    BoundingBox, ClassTable, Detection, DetectionBatch, DetectionEngine, DetectionError,
    EngineOptions, InferenceRuntime, SuppressionMode,
};
pub use frame::{normalize_to_square, Frame, FrameInfo, FrameSlot};
pub use ingest::{FrameSource, ImagingDevice, PixelFormat, RawFrame, SyntheticDevice};
pub use overlay::TextRenderer;
pub use service::{CaptureOutcome, DetectionStatus, InspectionService, ServiceOptions};

/// Seconds since the Unix epoch as a float, the timestamp unit used on the wire.
pub fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Lock a mutex whose protected value stays consistent even if a holder panicked.
///
/// Every critical section in this crate is a single swap or insert, so a poisoned
/// lock never guards a half-updated value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
