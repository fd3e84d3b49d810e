//! Frame ingestion.
//!
//! This module provides the imaging-device seam and the acquisition loop:
//! - `ImagingDevice`: open/configure/read/release contract for a camera
//! - `SyntheticDevice`: generated frames for `stub://` URIs (tests, demos)
//! - `V4l2Device`: local USB/V4L2 cameras (feature: ingest-v4l2)
//! - `FrameSource`: owns one device and runs the dedicated acquisition thread
//!
//! Devices hand back `RawFrame`s in whatever layout the hardware produced; the
//! acquisition loop normalises them to RGB before they become `Frame`s.

mod normalize;
mod source;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

pub use normalize::PixelFormat;
pub use source::FrameSource;
pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// One frame as delivered by a device, before RGB normalisation.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn into_rgb_image(self) -> Result<RgbImage> {
        let rgb = normalize::normalize_to_rgb(&self.data, self.width, self.height, self.format)?;
        RgbImage::from_raw(self.width, self.height, rgb)
            .context("normalised buffer does not match frame dimensions")
    }
}

/// Imaging device contract.
///
/// Implementations are driven from a single thread at a time: `FrameSource`
/// moves the device into its acquisition thread and takes it back on stop.
pub trait ImagingDevice: Send {
    /// Device identifier for logs.
    fn name(&self) -> &str;

    fn open(&mut self, index: u32) -> Result<()>;

    /// Request a resolution and frame rate. Devices may settle on the nearest
    /// mode they support; unsupported requests are logged, not fatal.
    fn configure(&mut self, width: u32, height: u32, fps: u32) -> Result<()>;

    /// Read the next frame. `Ok(None)` means no frame was ready this time.
    fn read_frame(&mut self) -> Result<Option<RawFrame>>;

    fn release(&mut self);

    /// False once the device is closed; the acquisition loop exits on it.
    fn is_open(&self) -> bool;
}

/// Build a device from its URI: `stub://...`, `v4l2`, or a `/dev/video*` path.
pub fn open_device(uri: &str) -> Result<Box<dyn ImagingDevice>> {
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new(uri)));
    }
    if uri == "v4l2" || uri.starts_with("/dev/video") {
        return open_v4l2(uri);
    }
    Err(anyhow!("unsupported camera device URI: {}", uri))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(uri: &str) -> Result<Box<dyn ImagingDevice>> {
    Ok(Box::new(V4l2Device::new(uri)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(uri: &str) -> Result<Box<dyn ImagingDevice>> {
    Err(anyhow!(
        "camera device {} requires the ingest-v4l2 feature",
        uri
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_uri_opens_synthetic_device() -> Result<()> {
        let device = open_device("stub://bench")?;
        assert_eq!(device.name(), "stub://bench");
        Ok(())
    }

    #[test]
    fn unknown_uri_is_rejected() {
        assert!(open_device("rtsp://camera").is_err());
    }

    #[test]
    fn raw_frame_converts_to_rgb_image() -> Result<()> {
        let raw = RawFrame::new(vec![7u8; 2 * 2 * 3], 2, 2, PixelFormat::Rgb24);
        let image = raw.into_rgb_image()?;
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 1).0, [7, 7, 7]);
        Ok(())
    }
}
