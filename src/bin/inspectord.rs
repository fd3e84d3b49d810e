//! inspectord - visual inspection daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + VRS_* environment overrides)
//! 2. Opens the camera and starts continuous acquisition (fatal if the camera is unusable)
//! 3. Loads the detection model (optional; the frame pipeline runs without it)
//! 4. Serves the HTTP/WebSocket API and streams frames to attached clients
//! 5. On Ctrl-C: stops the API, detaches clients, stops acquisition, releases the camera

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use inspection_kernel::api::{ApiConfig, ApiServer};
use inspection_kernel::config::InspectorConfig;
use inspection_kernel::detect::{ClassTable, DetectionEngine, EngineOptions};
use inspection_kernel::ingest::open_device;
use inspection_kernel::{
    BroadcastOptions, FrameSource, InspectionService, ServiceOptions, StreamBroadcaster,
    TextRenderer,
};

#[derive(Parser, Debug)]
#[command(name = "inspectord", about = "Real-time visual inspection backend")]
struct Args {
    /// JSON config file (overrides VRS_CONFIG)
    #[arg(long, env = "VRS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,

    /// Produce placeholder detections when no model is loaded
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = InspectorConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if args.simulate {
        cfg.model.simulate_without_model = true;
    }

    let text = TextRenderer::load(cfg.font_path.as_deref());

    let device = open_device(&cfg.camera.device)?;
    if is_synthetic(&cfg.camera.device) {
        log::warn!(
            "camera device {} is synthetic; streaming generated frames, not a real camera",
            cfg.camera.device
        );
    }
    let frames = Arc::new(FrameSource::new(device, text.clone()));
    if !frames.initialize(cfg.camera.index, cfg.camera.width, cfg.camera.height, cfg.camera.fps) {
        return Err(anyhow!(
            "failed to initialize camera {} (index {})",
            cfg.camera.device,
            cfg.camera.index
        ));
    }
    if !frames.start() {
        return Err(anyhow!("failed to start frame acquisition"));
    }

    let engine = load_engine(&cfg, &text);
    let service = Arc::new(InspectionService::new(
        frames.clone(),
        engine,
        ServiceOptions {
            captures_dir: cfg.captures_dir.clone(),
            capture_jpeg_quality: cfg.capture_jpeg_quality,
            square_size: cfg.stream.square_size,
            confidence_threshold: cfg.model.confidence_threshold,
            iou_threshold: cfg.model.iou_threshold,
            simulate_without_model: cfg.model.simulate_without_model,
        },
        text,
    ));
    let status = service.detection_status();
    log::info!(
        "detection: available={} model_loaded={} simulation={}",
        status.available,
        status.model_loaded,
        status.simulation
    );

    let broadcaster = Arc::new(StreamBroadcaster::new(
        service,
        BroadcastOptions {
            fps: cfg.stream.fps,
            jpeg_quality: cfg.stream.jpeg_quality,
            square_size: cfg.stream.square_size,
            waiting_interval: Duration::from_secs(1),
        },
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("inspectord-worker")
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(serve(&cfg, broadcaster.clone()));

    log::info!("stopping frame acquisition");
    frames.shutdown();
    result
}

async fn serve(cfg: &InspectorConfig, broadcaster: Arc<StreamBroadcaster>) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    let mut api = ApiServer::new(
        ApiConfig {
            addr: cfg.server_addr.clone(),
            queue_depth: cfg.stream.queue_depth,
        },
        broadcaster.clone(),
    )
    .spawn()
    .await?;
    log::info!("inspectord running; waiting for shutdown signal (Ctrl-C)...");

    let exited = tokio::select! {
        _ = rx.recv() => None,
        result = api.wait() => Some(result),
    };
    let served = match exited {
        None => {
            log::info!("shutdown signal received, stopping API server...");
            broadcaster.shutdown().await;
            api.stop().await
        }
        Some(result) => {
            log::error!("api server exited unexpectedly");
            broadcaster.shutdown().await;
            result
        }
    };

    let stats = broadcaster.stats();
    log::info!(
        "broadcast totals: loops={} passes={} frames_sent={} dropped={}",
        stats.loop_starts,
        stats.passes,
        stats.frames_sent,
        stats.dropped_connections
    );
    served
}

fn is_synthetic(device: &str) -> bool {
    device.starts_with("stub://")
}

fn load_engine(cfg: &InspectorConfig, text: &TextRenderer) -> Option<DetectionEngine> {
    let path = cfg.model.path.as_ref()?;
    let classes = match &cfg.model.class_labels {
        Some(labels) => ClassTable::from_labels(labels.iter().cloned()),
        None => ClassTable::pcb_defaults(),
    };
    let options = EngineOptions {
        input_size: cfg.model.input_size,
        suppression: cfg.model.suppression,
        classes,
        text: text.clone(),
        ..EngineOptions::default()
    };
    match DetectionEngine::load(path, options) {
        Ok(engine) => Some(engine),
        Err(err) => {
            log::warn!("detection model unavailable, streaming frames only: {}", err);
            None
        }
    }
}
