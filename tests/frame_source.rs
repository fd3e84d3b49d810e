use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use inspection_kernel::{
    normalize_to_square, Frame, FrameSource, ImagingDevice, PixelFormat, RawFrame,
    SyntheticDevice, TextRenderer,
};

/// Device that returns solid 640x480 frames and counts reads.
struct FixedDevice {
    open: bool,
    fail_open: bool,
    fail_reads: bool,
    reads: Arc<AtomicU64>,
}

impl FixedDevice {
    fn new() -> Self {
        Self {
            open: false,
            fail_open: false,
            fail_reads: false,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl ImagingDevice for FixedDevice {
    fn name(&self) -> &str {
        "fixed"
    }

    fn open(&mut self, _index: u32) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("no such device"));
        }
        self.open = true;
        Ok(())
    }

    fn configure(&mut self, _width: u32, _height: u32, _fps: u32) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(anyhow!("sensor timeout"));
        }
        Ok(Some(RawFrame::new(
            vec![90u8; 640 * 480 * 3],
            640,
            480,
            PixelFormat::Rgb24,
        )))
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn wait_for_frame(source: &FrameSource, min_sequence: u64) -> Frame {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(frame) = source.current_frame() {
            if frame.sequence >= min_sequence {
                return frame;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for frame {}", min_sequence);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn acquires_and_normalizes_frames() {
    let source = FrameSource::new(Box::new(FixedDevice::new()), TextRenderer::disabled());
    assert!(source.initialize(0, 640, 480, 30));
    assert!(source.start());

    let frame = wait_for_frame(&source, 1);
    assert_eq!((frame.width(), frame.height()), (640, 480));
    assert!(frame.timestamp > 0.0);

    let square = normalize_to_square(frame.image(), 640);
    assert_eq!(square.dimensions(), (640, 640));

    let info = source.frame_info();
    assert!(info.is_active());
    assert_eq!(info.is_square, Some(false));

    source.stop();
    assert!(!source.is_running());
}

#[test]
fn sequence_numbers_increase() {
    let source = FrameSource::new(Box::new(FixedDevice::new()), TextRenderer::disabled());
    assert!(source.initialize(0, 640, 480, 100));
    assert!(source.start());

    let first = wait_for_frame(&source, 1);
    let later = wait_for_frame(&source, first.sequence + 2);
    assert!(later.sequence > first.sequence);
    assert!(later.timestamp >= first.timestamp);
    source.stop();
}

#[test]
fn initialize_reports_open_failure() {
    let mut device = FixedDevice::new();
    device.fail_open = true;
    let source = FrameSource::new(Box::new(device), TextRenderer::disabled());
    assert!(!source.initialize(0, 640, 480, 30));
    assert!(!source.start());
}

#[test]
fn initialize_reports_read_failure() {
    let mut device = FixedDevice::new();
    device.fail_reads = true;
    let source = FrameSource::new(Box::new(device), TextRenderer::disabled());
    assert!(!source.initialize(0, 640, 480, 30));
    assert!(source.current_frame().is_none());
}

#[test]
fn start_is_idempotent_and_stop_is_safe() {
    let source = FrameSource::new(
        Box::new(SyntheticDevice::new("stub://idempotent")),
        TextRenderer::disabled(),
    );
    source.stop();
    assert!(source.initialize(0, 64, 48, 50));
    assert!(source.start());
    assert!(source.start());
    assert!(source.is_running());

    source.stop();
    source.stop();
    assert!(!source.is_running());

    // The device comes back on stop, so acquisition can resume.
    let before = wait_for_frame(&source, 1).sequence;
    assert!(source.start());
    wait_for_frame(&source, before + 1);
    source.shutdown();
    assert!(!source.is_running());
}

#[test]
fn stop_returns_promptly_while_streaming() {
    let reads;
    let source = {
        let device = FixedDevice::new();
        reads = device.reads.clone();
        FrameSource::new(Box::new(device), TextRenderer::disabled())
    };
    assert!(source.initialize(0, 640, 480, 30));
    assert!(source.start());
    wait_for_frame(&source, 1);

    let started = Instant::now();
    source.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(reads.load(Ordering::SeqCst) >= 2);
}
