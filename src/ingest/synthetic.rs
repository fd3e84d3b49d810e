use anyhow::{anyhow, Result};

use super::{ImagingDevice, PixelFormat, RawFrame};

/// Generated-frame device for `stub://` URIs.
///
/// Produces a moving gradient with a dark rectangle that drifts across the
/// scene, enough texture for the stream and detection paths to exercise.
pub struct SyntheticDevice {
    uri: String,
    width: u32,
    height: u32,
    open: bool,
    frame_count: u64,
}

impl SyntheticDevice {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            width: 640,
            height: 480,
            open: false,
            frame_count: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.width as u64, self.height as u64);
        let shift = self.frame_count.wrapping_mul(4);
        let marker_x = shift % w.max(1);
        let marker_y = h / 3;
        let (marker_w, marker_h) = (w / 8, h / 6);

        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let inside_marker = x >= marker_x
                    && x < marker_x + marker_w
                    && y >= marker_y
                    && y < marker_y + marker_h;
                if inside_marker {
                    pixels.extend_from_slice(&[24, 24, 24]);
                } else {
                    pixels.push(((x + shift) % 256) as u8);
                    pixels.push(((y * 255) / h.max(1)) as u8);
                    pixels.push(96);
                }
            }
        }
        pixels
    }
}

impl ImagingDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.uri
    }

    fn open(&mut self, index: u32) -> Result<()> {
        self.open = true;
        log::info!("{}: opened synthetic camera {}", self.uri, index);
        Ok(())
    }

    fn configure(&mut self, width: u32, height: u32, _fps: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic camera needs a non-zero resolution"));
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        if !self.open {
            return Err(anyhow!("{} is not open", self.uri));
        }
        self.frame_count += 1;
        Ok(Some(RawFrame::new(
            self.generate_pixels(),
            self.width,
            self.height,
            PixelFormat::Rgb24,
        )))
    }

    fn release(&mut self) {
        if self.open {
            log::info!("{}: released synthetic camera", self.uri);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
