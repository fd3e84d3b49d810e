//! Frame model and single-slot publication.
//!
//! - `Frame`: one acquired RGB image with its capture timestamp and sequence number.
//! - `FrameSlot`: holds the latest published frame. The acquisition thread swaps in a
//!   fresh `Arc<Frame>`; readers clone the pointer under the lock and copy outside it.
//! - `normalize_to_square`: center crop + resize shared by detection and display so
//!   every consumer sees the same geometry.
//!
//! There is no frame queue. Publishing replaces the previous frame wholesale.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::lock;

/// One acquired frame. Immutable once published.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Capture time, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Monotonic sequence number; the first published frame is 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: f64, sequence: u64) -> Self {
        Self {
            image,
            timestamp,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Square-normalised copy that keeps the timestamp and sequence number.
    pub fn to_square(&self, target_size: u32) -> Frame {
        Frame {
            image: normalize_to_square(&self.image, target_size),
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// Center-crop to a square on the shorter dimension, then resize to `target_size`.
pub fn normalize_to_square(image: &RgbImage, target_size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    if side == 0 {
        return RgbImage::new(target_size, target_size);
    }

    let x = (width - side) / 2;
    let y = (height - side) / 2;
    let cropped = imageops::crop_imm(image, x, y, side, side).to_image();
    if side == target_size {
        return cropped;
    }
    imageops::resize(&cropped, target_size, target_size, FilterType::Triangle)
}

/// Latest-frame buffer shared between the acquisition thread and readers.
#[derive(Default)]
pub struct FrameSlot {
    current: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new frame. The previous frame is dropped outside the lock.
    pub fn publish(&self, frame: Frame) {
        let next = Arc::new(frame);
        let previous = lock(&self.current).replace(next);
        drop(previous);
    }

    /// Independent copy of the latest frame, or `None` before the first publish.
    pub fn latest(&self) -> Option<Frame> {
        let shared = self.shared()?;
        Some(Frame::clone(&shared))
    }

    /// Metadata of the latest frame without copying its pixels.
    pub fn info(&self) -> FrameInfo {
        match self.shared() {
            Some(frame) => FrameInfo::from_frame(&frame),
            None => FrameInfo::no_frame(),
        }
    }

    /// Sequence number of the latest frame, 0 before the first publish.
    pub fn sequence(&self) -> u64 {
        self.shared().map(|frame| frame.sequence).unwrap_or(0)
    }

    pub fn clear(&self) {
        let previous = lock(&self.current).take();
        drop(previous);
    }

    fn shared(&self) -> Option<Arc<Frame>> {
        lock(&self.current).clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Descriptor of the latest frame as reported to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameInfo {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_square: Option<bool>,
}

impl FrameInfo {
    pub fn no_frame() -> Self {
        Self {
            status: "no_frame",
            frame_count: None,
            resolution: None,
            last_update: None,
            is_square: None,
        }
    }

    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            status: "active",
            frame_count: Some(frame.sequence),
            resolution: Some(Resolution {
                width: frame.width(),
                height: frame.height(),
            }),
            last_update: Some(frame.timestamp),
            is_square: Some(frame.width() == frame.height()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}
