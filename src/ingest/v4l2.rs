//! V4L2 imaging device.
//!
//! `V4l2Device` drives a local device node (e.g., /dev/video0) through libv4l:
//! - `open` opens the node; a bare `v4l2` URI resolves to `/dev/video{index}`
//! - `configure` negotiates format and frame rate, then maps capture buffers
//! - `read_frame` dequeues one buffer and copies it out as a `RawFrame`
//!
//! The negotiated fourcc decides the `PixelFormat`; RGB3 is requested first and
//! YUYV, BGR3 or NV12 are accepted when the driver insists on them.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{ImagingDevice, PixelFormat, RawFrame};

const CAPTURE_BUFFERS: u32 = 4;

pub struct V4l2Device {
    uri: String,
    path: Option<String>,
    pending: Option<v4l::Device>,
    state: Option<V4l2StreamState>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_count: u64,
}

#[self_referencing]
struct V4l2StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            path: None,
            pending: None,
            state: None,
            width: 0,
            height: 0,
            format: PixelFormat::Rgb24,
            frame_count: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn device_path(&self, index: u32) -> String {
        if self.uri.starts_with("/dev/") {
            self.uri.clone()
        } else {
            format!("/dev/video{}", index)
        }
    }

    fn start_stream(&mut self, device: v4l::Device) -> Result<()> {
        use v4l::buffer::Type;

        let state = V4l2StreamStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        Ok(())
    }
}

fn pixel_format_for(fourcc: v4l::FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"NV12" => Some(PixelFormat::Nv12),
        _ => None,
    }
}

impl ImagingDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.uri
    }

    fn open(&mut self, index: u32) -> Result<()> {
        let path = self.device_path(index);
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        log::info!("V4l2Device: opened {}", path);
        self.state = None;
        self.pending = Some(device);
        self.path = Some(path);
        Ok(())
    }

    fn configure(&mut self, width: u32, height: u32, fps: u32) -> Result<()> {
        use v4l::video::Capture;

        let path = self.path.clone().unwrap_or_else(|| self.uri.clone());
        let device = match self.pending.take() {
            Some(device) => device,
            None => {
                // Reconfiguring a streaming device: drop the mapping and reopen.
                self.state = None;
                v4l::Device::with_path(&path)
                    .with_context(|| format!("reopen v4l2 device {}", path))?
            }
        };

        let mut format = device.format().context("read v4l2 format")?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", path, err);
            }
        }

        self.format = pixel_format_for(format.fourcc).ok_or_else(|| {
            anyhow!("{} negotiated unsupported pixel format {}", path, format.fourcc)
        })?;
        self.width = format.width;
        self.height = format.height;
        if (self.width, self.height) != (width, height) {
            log::warn!(
                "V4l2Device: {} requested {}x{}, device settled on {}x{}",
                path,
                width,
                height,
                self.width,
                self.height
            );
        }

        self.start_stream(device)?;
        log::info!(
            "V4l2Device: streaming {} at {}x{} ({:?})",
            path,
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        use v4l::io::traits::CaptureStream;

        if self.state.is_none() {
            // Opened but never configured: stream in the device's current mode.
            let (width, height) = (self.width, self.height);
            self.configure(width, height, 0)?;
        }
        let expected = self.format.frame_len(self.width, self.height)?;
        let state = self.state.as_mut().context("v4l2 device not open")?;
        let data = state.with_mut(|fields| {
            fields.stream.next().map(|(buf, meta)| {
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    used => used.min(buf.len()),
                };
                buf[..used.min(expected)].to_vec()
            })
        });
        let data = data.map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

        if data.len() < expected {
            log::debug!(
                "V4l2Device: short buffer ({} of {} bytes), skipping",
                data.len(),
                expected
            );
            return Ok(None);
        }

        self.frame_count += 1;
        Ok(Some(RawFrame::new(data, self.width, self.height, self.format)))
    }

    fn release(&mut self) {
        if self.state.take().is_some() || self.pending.take().is_some() {
            log::info!("V4l2Device: released {}", self.uri);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some() || self.pending.is_some()
    }
}
