use chrono::Local;
use image::imageops;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::ImagingDevice;
use crate::frame::{normalize_to_square, Frame, FrameInfo, FrameSlot};
use crate::overlay::TextRenderer;
use crate::{lock, now_epoch_secs};

const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
const OVERLAY_TEXT_SIZE: f32 = 24.0;
const OVERLAY_WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const OVERLAY_YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

struct Worker {
    handle: JoinHandle<Box<dyn ImagingDevice>>,
    running: Arc<AtomicBool>,
}

/// Owns one imaging device and the thread that continuously acquires from it.
///
/// The device lives in `device` while idle and moves into the acquisition
/// thread while running; `stop` hands it back. Readers only ever touch the
/// shared `FrameSlot`.
pub struct FrameSource {
    device: Mutex<Option<Box<dyn ImagingDevice>>>,
    worker: Mutex<Option<Worker>>,
    slot: Arc<FrameSlot>,
    overlay: TextRenderer,
    fps: AtomicU32,
    initialized: AtomicBool,
}

impl FrameSource {
    pub fn new(device: Box<dyn ImagingDevice>, overlay: TextRenderer) -> Self {
        Self {
            device: Mutex::new(Some(device)),
            worker: Mutex::new(None),
            slot: Arc::new(FrameSlot::new()),
            overlay,
            fps: AtomicU32::new(30),
            initialized: AtomicBool::new(false),
        }
    }

    /// Open the device, request the mode, and verify by reading one frame.
    ///
    /// Returns `false` when the device cannot be opened or yields no frame.
    pub fn initialize(&self, device_index: u32, width: u32, height: u32, fps: u32) -> bool {
        if self.is_running() {
            log::warn!("frame source: initialize called while acquisition is running");
            return false;
        }
        let mut guard = lock(&self.device);
        let Some(device) = guard.as_mut() else {
            log::error!("frame source: no imaging device available");
            return false;
        };

        if let Err(err) = device.open(device_index) {
            log::error!("frame source: failed to open {} ({}): {:#}", device.name(), device_index, err);
            return false;
        }
        if let Err(err) = device.configure(width, height, fps) {
            log::error!("frame source: failed to configure {}: {:#}", device.name(), err);
            device.release();
            return false;
        }
        match device.read_frame() {
            Ok(Some(frame)) => {
                log::info!(
                    "frame source: {} ready at {}x{} @ {} fps",
                    device.name(),
                    frame.width,
                    frame.height,
                    fps
                );
            }
            Ok(None) => {
                log::error!("frame source: {} produced no test frame", device.name());
                device.release();
                return false;
            }
            Err(err) => {
                log::error!("frame source: test read from {} failed: {:#}", device.name(), err);
                device.release();
                return false;
            }
        }

        self.fps.store(fps.max(1), Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        true
    }

    /// Begin continuous acquisition. Idempotent; returns whether acquisition is running.
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.worker);
        if let Some(current) = worker.as_ref() {
            if !current.handle.is_finished() {
                log::debug!("frame source: acquisition already running");
                return true;
            }
        }
        if let Some(finished) = worker.take() {
            self.reclaim(finished.handle);
        }
        if !self.initialized.load(Ordering::Acquire) {
            log::warn!("frame source: start called before a successful initialize");
            return false;
        }

        let Some(device) = lock(&self.device).take() else {
            log::error!("frame source: imaging device is unavailable");
            return false;
        };
        if !device.is_open() {
            log::warn!("frame source: {} is closed; not starting", device.name());
            *lock(&self.device) = Some(device);
            return false;
        }

        let running = Arc::new(AtomicBool::new(true));
        let context = AcquisitionContext {
            running: running.clone(),
            slot: self.slot.clone(),
            overlay: self.overlay.clone(),
            period: Duration::from_secs_f64(1.0 / self.fps.load(Ordering::Acquire).max(1) as f64),
        };
        let spawned = thread::Builder::new()
            .name("frame-acquisition".to_string())
            .spawn(move || acquisition_loop(device, context));
        match spawned {
            Ok(handle) => {
                log::info!("frame source: acquisition started");
                *worker = Some(Worker { handle, running });
                true
            }
            Err(err) => {
                log::error!("frame source: failed to spawn acquisition thread: {}", err);
                false
            }
        }
    }

    /// Signal the loop and wait up to two seconds for it to exit. Safe when idle.
    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        let Some(current) = worker.take() else {
            return;
        };
        current.running.store(false, Ordering::Release);
        current.handle.thread().unpark();

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !current.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(STOP_POLL);
        }
        if current.handle.is_finished() {
            self.reclaim(current.handle);
            log::info!("frame source: acquisition stopped");
        } else {
            // The thread keeps its device until the blocked read returns, then exits.
            log::warn!(
                "frame source: acquisition thread did not exit within {:?}; detaching",
                STOP_TIMEOUT
            );
        }
    }

    /// Stop acquisition and release the device.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(device) = lock(&self.device).as_mut() {
            device.release();
        }
        self.initialized.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map(|worker| worker.running.load(Ordering::Acquire) && !worker.handle.is_finished())
            .unwrap_or(false)
    }

    /// Independent copy of the latest frame; never torn.
    pub fn current_frame(&self) -> Option<Frame> {
        self.slot.latest()
    }

    /// Latest frame center-cropped and resized to `target_size` squared.
    pub fn current_square_frame(&self, target_size: u32) -> Option<Frame> {
        self.slot.latest().map(|frame| frame.to_square(target_size))
    }

    pub fn frame_info(&self) -> FrameInfo {
        self.slot.info()
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Configured acquisition rate in frames per second.
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Acquire)
    }

    pub fn normalize_to_square(image: &RgbImage, target_size: u32) -> RgbImage {
        normalize_to_square(image, target_size)
    }

    fn reclaim(&self, handle: JoinHandle<Box<dyn ImagingDevice>>) {
        match handle.join() {
            Ok(device) => {
                *lock(&self.device) = Some(device);
            }
            Err(_) => {
                log::error!("frame source: acquisition thread panicked; device lost");
                self.initialized.store(false, Ordering::Release);
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcquisitionContext {
    running: Arc<AtomicBool>,
    slot: Arc<FrameSlot>,
    overlay: TextRenderer,
    period: Duration,
}

fn acquisition_loop(
    mut device: Box<dyn ImagingDevice>,
    ctx: AcquisitionContext,
) -> Box<dyn ImagingDevice> {
    let mut sequence = ctx.slot.sequence();
    let mut next_deadline = Instant::now();

    while ctx.running.load(Ordering::Acquire) {
        if !device.is_open() {
            log::warn!("frame source: {} closed; acquisition ending", device.name());
            break;
        }

        let raw = match device.read_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::warn!("frame source: {} returned no frame", device.name());
                park_until(Instant::now() + ERROR_BACKOFF, &ctx.running);
                continue;
            }
            Err(err) => {
                log::warn!("frame source: read from {} failed: {:#}", device.name(), err);
                park_until(Instant::now() + ERROR_BACKOFF, &ctx.running);
                continue;
            }
        };
        let mut image = match raw.into_rgb_image() {
            Ok(image) => image,
            Err(err) => {
                log::warn!("frame source: dropping undecodable frame: {:#}", err);
                park_until(Instant::now() + ERROR_BACKOFF, &ctx.running);
                continue;
            }
        };

        sequence += 1;
        let timestamp = now_epoch_secs();
        imageops::flip_horizontal_in_place(&mut image);
        stamp_overlay(&mut image, &ctx.overlay, sequence);
        ctx.slot.publish(Frame::new(image, timestamp, sequence));
        log::debug!("frame source: published frame {}", sequence);

        next_deadline += ctx.period;
        let now = Instant::now();
        if next_deadline <= now {
            next_deadline = now;
        } else {
            park_until(next_deadline, &ctx.running);
        }
    }

    device
}

/// Sleep until `deadline`, waking early when `stop` unparks the thread.
fn park_until(deadline: Instant, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

fn stamp_overlay(image: &mut RgbImage, overlay: &TextRenderer, sequence: u64) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    overlay.draw(image, &format!("Frame: {}", sequence), 10, 10, OVERLAY_TEXT_SIZE, OVERLAY_WHITE);
    overlay.draw(image, &timestamp, 10, 40, OVERLAY_TEXT_SIZE, OVERLAY_WHITE);
    overlay.draw(image, "LIVE VRS", 10, 70, OVERLAY_TEXT_SIZE, OVERLAY_YELLOW);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticDevice;

    fn synthetic_source() -> FrameSource {
        FrameSource::new(Box::new(SyntheticDevice::new("stub://unit")), TextRenderer::disabled())
    }

    #[test]
    fn start_requires_initialize() {
        let source = synthetic_source();
        assert!(!source.start());
        assert!(!source.is_running());
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn frames_are_mirrored_before_publication() {
        let source = synthetic_source();
        assert!(source.initialize(0, 32, 16, 60));
        assert!(source.start());

        let deadline = Instant::now() + Duration::from_secs(2);
        let frame = loop {
            if let Some(frame) = source.current_frame() {
                break frame;
            }
            assert!(Instant::now() < deadline, "no frame published");
            thread::sleep(Duration::from_millis(5));
        };
        source.stop();

        // The synthetic scene's blue channel is constant outside the marker,
        // so only the mirrored red gradient is checked.
        assert_eq!((frame.width(), frame.height()), (32, 16));
        let left = frame.image().get_pixel(31, 15).0[0] as i32;
        let right = frame.image().get_pixel(30, 15).0[0] as i32;
        assert_eq!((right - left).rem_euclid(256), 1);
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let source = synthetic_source();
        source.stop();
        source.stop();
        assert!(!source.is_running());
    }
}
