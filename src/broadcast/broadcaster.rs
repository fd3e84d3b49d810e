use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::connection::{Connection, ConnectionId, PushOutcome};
use super::messages::{decode_inbound, InboundMessage, OutboundMessage};
use super::registry::ConnectionRegistry;
use crate::encode::jpeg_base64;
use crate::frame::FrameInfo;
use crate::now_epoch_secs;
use crate::service::InspectionService;

#[derive(Clone, Debug)]
pub struct BroadcastOptions {
    /// Target passes per second.
    pub fps: u32,
    pub jpeg_quality: u8,
    pub square_size: u32,
    /// Minimum spacing of `camera_status: waiting` notices.
    pub waiting_interval: Duration,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            fps: 10,
            jpeg_quality: 75,
            square_size: 640,
            waiting_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Streaming,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub loop_starts: u64,
    pub loop_stops: u64,
    pub passes: u64,
    pub frames_sent: u64,
    pub lagged_pushes: u64,
    pub dropped_connections: u64,
}

#[derive(Default)]
struct Counters {
    loop_starts: AtomicU64,
    loop_stops: AtomicU64,
    passes: AtomicU64,
    frames_sent: AtomicU64,
    lagged_pushes: AtomicU64,
    dropped_connections: AtomicU64,
}

struct Shared {
    service: Arc<InspectionService>,
    registry: ConnectionRegistry,
    options: BroadcastOptions,
    counters: Counters,
}

struct StreamTask {
    epoch: u64,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Pushes the latest frame to every attached connection while any are attached.
///
/// Idle -> Streaming on the first attach; Streaming -> Idle once the registry
/// empties. The loop handle lives in `task` and is always joined on stop.
pub struct StreamBroadcaster {
    shared: Arc<Shared>,
    task: Mutex<Option<StreamTask>>,
}

impl StreamBroadcaster {
    pub fn new(service: Arc<InspectionService>, options: BroadcastOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                registry: ConnectionRegistry::new(),
                options,
                counters: Counters::default(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<InspectionService> {
        &self.shared.service
    }

    pub fn stream_state(&self) -> StreamState {
        match self.shared.registry.active_epoch() {
            Some(_) => StreamState::Streaming,
            None => StreamState::Idle,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn stats(&self) -> BroadcastStats {
        let c = &self.shared.counters;
        BroadcastStats {
            loop_starts: c.loop_starts.load(Ordering::Acquire),
            loop_stops: c.loop_stops.load(Ordering::Acquire),
            passes: c.passes.load(Ordering::Acquire),
            frames_sent: c.frames_sent.load(Ordering::Acquire),
            lagged_pushes: c.lagged_pushes.load(Ordering::Acquire),
            dropped_connections: c.dropped_connections.load(Ordering::Acquire),
        }
    }

    /// Register a connection, greet it, and start streaming if it is the first.
    ///
    /// Returns `false` when the connection was already attached or the welcome
    /// could not be delivered.
    pub async fn attach(&self, connection: Connection) -> bool {
        let registry = &self.shared.registry;
        if registry.contains(connection.id()) {
            log::debug!("{} already attached", connection.id());
            return false;
        }

        // Greet before registering so no frame can overtake the welcome.
        let welcome = OutboundMessage::Connection {
            status: "connected",
            client_id: connection.client_id().to_string(),
            server_time: now_epoch_secs(),
            camera_status: self.shared.service.camera_info(),
        };
        if let Err(err) = connection.send(welcome.to_payload()).await {
            log::warn!("{}: welcome failed: {}", connection.id(), err);
            return false;
        }

        let id = connection.id();
        let client_id = connection.client_id().to_string();
        let insertion = registry.insert(connection);
        if !insertion.added {
            return false;
        }
        log::info!(
            "client {} attached as {}; {} connected",
            client_id,
            id,
            registry.len()
        );
        if let Some(epoch) = insertion.start_epoch {
            self.start_loop(epoch).await;
        }
        true
    }

    /// Unregister a connection; stops and joins the loop when it was the last.
    pub async fn detach(&self, id: ConnectionId) -> bool {
        let Some(connection) = self.shared.registry.remove(id) else {
            return false;
        };
        log::info!(
            "client {} ({}) detached; {} connected",
            connection.client_id(),
            id,
            self.shared.registry.len()
        );
        self.shared.registry.release_if_empty();
        self.reap_released().await;
        true
    }

    /// Detach everyone and join the loop.
    pub async fn shutdown(&self) {
        let drained = self.shared.registry.drain();
        if !drained.is_empty() {
            log::info!("broadcaster shutting down; closing {} connections", drained.len());
        }
        drop(drained);
        self.reap_released().await;
    }

    /// Dispatch one inbound text payload from `id`.
    pub async fn handle_message(&self, id: ConnectionId, text: &str) {
        let message = match decode_inbound(text) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("{}: ignoring inbound message: {}", id, err);
                return;
            }
        };
        let Some(connection) = self.shared.registry.get(id) else {
            log::debug!("{}: message from detached connection ignored", id);
            return;
        };

        let response = self.respond(&connection, message).await;
        if let Err(err) = connection.send(response.to_payload()).await {
            log::warn!("{}: dropping connection: {}", id, err);
            self.drop_failed(id).await;
        }
    }

    async fn respond(&self, connection: &Connection, message: InboundMessage) -> OutboundMessage {
        let service = &self.shared.service;
        match message {
            InboundMessage::CaptureImage {
                request_id,
                filename,
                enable_detection,
            } => {
                let worker = service.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    worker.capture(filename.as_deref(), enable_detection)
                })
                .await;
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        log::error!("capture worker failed: {}", err);
                        crate::service::CaptureOutcome::failed("Capture failed unexpectedly")
                    }
                };
                OutboundMessage::capture_response(request_id, outcome, now_epoch_secs())
            }
            InboundMessage::GetStatus { request_id } => OutboundMessage::StatusResponse {
                request_id,
                camera_info: service.camera_info(),
                detection_status: service.detection_status(),
                connections: self.connection_count(),
                streaming: self.stream_state() == StreamState::Streaming,
                server_time: now_epoch_secs(),
            },
            InboundMessage::Ping { timestamp } => OutboundMessage::Pong {
                timestamp: now_epoch_secs(),
                client_timestamp: timestamp,
                client_id: connection.client_id().to_string(),
            },
            InboundMessage::SetDetection {
                request_id,
                enabled,
            } => {
                let enabled = match enabled {
                    Some(enabled) => {
                        service.set_detection_enabled(enabled);
                        enabled
                    }
                    None => service.toggle_detection(),
                };
                let status = service.detection_status();
                let message = match (enabled, status.available) {
                    (true, true) => "Detection enabled",
                    (true, false) => "Detection enabled, but no model is available",
                    (false, _) => "Detection disabled",
                };
                OutboundMessage::DetectionSettingResponse {
                    request_id,
                    success: true,
                    enabled,
                    detection_status: status,
                    message: message.to_string(),
                    timestamp: now_epoch_secs(),
                }
            }
        }
    }

    async fn drop_failed(&self, id: ConnectionId) {
        if self.detach(id).await {
            self.shared
                .counters
                .dropped_connections
                .fetch_add(1, Ordering::AcqRel);
        }
    }

    async fn start_loop(&self, epoch: u64) {
        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            stop_task(previous).await;
        }
        if self.shared.registry.active_epoch() != Some(epoch) {
            // Released again before we got here; nothing to stream for.
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = self.shared.clone();
        let handle = tokio::spawn(run_loop(shared, epoch, shutdown_rx));
        self.shared
            .counters
            .loop_starts
            .fetch_add(1, Ordering::AcqRel);
        log::info!("broadcast loop started (epoch {})", epoch);
        *task = Some(StreamTask {
            epoch,
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop and join the loop if its epoch is no longer the active one.
    async fn reap_released(&self) {
        let mut task = self.task.lock().await;
        let released = match task.as_ref() {
            Some(current) => self.shared.registry.active_epoch() != Some(current.epoch),
            None => false,
        };
        if released {
            if let Some(current) = task.take() {
                stop_task(current).await;
            }
        }
    }
}

async fn stop_task(task: StreamTask) {
    let _ = task.shutdown.send(());
    if let Err(err) = task.handle.await {
        if err.is_panic() {
            log::error!("broadcast loop (epoch {}) panicked", task.epoch);
        }
    }
}

struct CachedFrame {
    sequence: u64,
    payload: Arc<str>,
}

async fn run_loop(shared: Arc<Shared>, epoch: u64, mut shutdown: oneshot::Receiver<()>) {
    let period = Duration::from_secs_f64(1.0 / shared.options.fps.max(1) as f64);
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_waiting: Option<Instant> = None;
    let mut cached: Option<CachedFrame> = None;

    loop {
        // The only cancellation point: a pass is never interrupted half-sent.
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        if shared.registry.active_epoch() != Some(epoch) {
            break;
        }
        shared.counters.passes.fetch_add(1, Ordering::AcqRel);

        let connections = shared.registry.snapshot();
        if connections.is_empty() {
            if shared.registry.release_if_empty_for(epoch) {
                break;
            }
            continue;
        }

        let Some((payload, is_frame)) = next_payload(&shared, &mut cached, &mut last_waiting).await
        else {
            continue;
        };

        let mut closed = Vec::new();
        for connection in &connections {
            match connection.push(payload.clone()) {
                PushOutcome::Delivered => {
                    if is_frame {
                        shared.counters.frames_sent.fetch_add(1, Ordering::AcqRel);
                    }
                }
                PushOutcome::Lagging => {
                    log::debug!("{} is lagging; frame skipped", connection.id());
                    shared.counters.lagged_pushes.fetch_add(1, Ordering::AcqRel);
                }
                PushOutcome::Closed => closed.push(connection.id()),
            }
        }

        if !closed.is_empty() {
            let removed = shared.registry.remove_many(&closed);
            for connection in &removed {
                log::info!(
                    "client {} ({}) disconnected during broadcast",
                    connection.client_id(),
                    connection.id()
                );
            }
            shared
                .counters
                .dropped_connections
                .fetch_add(removed.len() as u64, Ordering::AcqRel);
            if shared.registry.release_if_empty_for(epoch) {
                break;
            }
        }
    }

    shared.counters.loop_stops.fetch_add(1, Ordering::AcqRel);
    log::info!("broadcast loop stopped (epoch {})", epoch);
}

/// Payload for this pass: the latest frame, or a throttled waiting notice.
async fn next_payload(
    shared: &Arc<Shared>,
    cached: &mut Option<CachedFrame>,
    last_waiting: &mut Option<Instant>,
) -> Option<(Arc<str>, bool)> {
    let frames = shared.service.frames();
    let sequence = frames.slot().sequence();
    if sequence == 0 {
        let due = last_waiting
            .map(|at| at.elapsed() >= shared.options.waiting_interval)
            .unwrap_or(true);
        if !due {
            return None;
        }
        *last_waiting = Some(Instant::now());
        return Some((OutboundMessage::waiting(now_epoch_secs()).to_payload(), false));
    }

    if let Some(frame) = cached.as_ref().filter(|c| c.sequence == sequence) {
        return Some((frame.payload.clone(), true));
    }

    let frame = frames.current_frame()?;
    let frame_sequence = frame.sequence;
    let options = shared.options.clone();
    let encoded = tokio::task::spawn_blocking(move || {
        let info = FrameInfo::from_frame(&frame);
        let square = frame.to_square(options.square_size);
        jpeg_base64(square.image(), options.jpeg_quality).map(|data| OutboundMessage::VideoFrame {
            data,
            timestamp: frame.timestamp,
            frame_info: info,
        })
    })
    .await;

    let message = match encoded {
        Ok(Ok(message)) => message,
        Ok(Err(err)) => {
            log::warn!("frame encode failed: {:#}", err);
            return None;
        }
        Err(err) => {
            log::error!("frame encode worker failed: {}", err);
            return None;
        }
    };
    let payload = message.to_payload();
    *cached = Some(CachedFrame {
        sequence: frame_sequence,
        payload: payload.clone(),
    });
    Some((payload, true))
}
