//! HTTP and WebSocket surface.
//!
//! Routes:
//! - `GET /` banner, `GET /health`, `GET /camera/info`
//! - `POST /camera/capture?filename=` snapshot (with detection when enabled)
//! - `GET /ws/status` broadcaster state and counters
//! - `GET /ws/{client_id}` WebSocket upgrade; the socket becomes a `Connection`

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broadcast::{Connection, ConnectionId, StreamBroadcaster, StreamState};
use crate::now_epoch_secs;
use crate::service::CaptureOutcome;

const DEFAULT_QUEUE_DEPTH: usize = 4;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Outbound queue depth per WebSocket connection.
    pub queue_depth: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub broadcaster: Arc<StreamBroadcaster>,
    pub queue_depth: usize,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<std::io::Result<()>>,
}

impl ApiHandle {
    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join
            .await
            .context("api server task panicked")?
            .context("api server failed")?;
        Ok(())
    }

    /// Wait for the server to exit on its own (it only does on error).
    pub async fn wait(&mut self) -> Result<()> {
        (&mut self.join)
            .await
            .context("api server task panicked")?
            .context("api server failed")?;
        Ok(())
    }
}

pub struct ApiServer {
    config: ApiConfig,
    broadcaster: Arc<StreamBroadcaster>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, broadcaster: Arc<StreamBroadcaster>) -> Self {
        Self {
            config,
            broadcaster,
        }
    }

    /// Bind the listener and serve on a tokio task.
    pub async fn spawn(self) -> Result<ApiHandle> {
        let listener = TcpListener::bind(&self.config.addr)
            .await
            .with_context(|| format!("failed to bind api listener on {}", self.config.addr))?;
        let addr = listener.local_addr()?;
        let app = router(ApiState {
            broadcaster: self.broadcaster,
            queue_depth: self.config.queue_depth,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        log::info!("api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join,
        })
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/camera/info", get(camera_info))
        .route("/camera/capture", post(capture))
        .route("/ws/status", get(ws_status))
        .route("/ws/:client_id", get(ws_upgrade))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Visual inspection backend",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let service = state.broadcaster.service();
    Json(json!({
        "status": "healthy",
        "camera_running": service.frames().is_running(),
        "detection_status": service.detection_status(),
        "timestamp": now_epoch_secs(),
    }))
}

async fn camera_info(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let service = state.broadcaster.service();
    Json(json!({
        "camera_info": service.camera_info(),
        "is_running": service.frames().is_running(),
        "detection_status": service.detection_status(),
    }))
}

#[derive(Debug, Deserialize)]
struct CaptureParams {
    filename: Option<String>,
}

async fn capture(State(state): State<ApiState>, Query(params): Query<CaptureParams>) -> Response {
    let service = state.broadcaster.service().clone();
    let outcome = tokio::task::spawn_blocking(move || service.capture(params.filename.as_deref(), true))
        .await
        .unwrap_or_else(|err| {
            log::error!("capture worker failed: {}", err);
            CaptureOutcome::failed("Capture failed unexpectedly")
        });
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome)).into_response()
}

async fn ws_status(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let broadcaster = &state.broadcaster;
    Json(json!({
        "active_connections": broadcaster.connection_count(),
        "streaming": broadcaster.stream_state() == StreamState::Streaming,
        "stream_state": broadcaster.stream_state(),
        "stats": broadcaster.stats(),
    }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<ApiState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Adapt one socket to a broadcaster `Connection` until either side closes.
async fn handle_socket(socket: WebSocket, client_id: String, state: ApiState) {
    let (sink, mut stream) = socket.split();
    let (connection, mut outbound) = Connection::channel(&client_id, state.queue_depth);
    let id = connection.id();

    let writer = tokio::spawn(async move { forward_outbound(&mut outbound, sink).await });

    if !state.broadcaster.attach(connection).await {
        finish_writer(id, writer).await;
        return;
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => state.broadcaster.handle_message(id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                log::debug!("{}: socket error: {}", id, err);
                break;
            }
        }
    }

    // Detaching drops the last `Connection` clone; the writer then drains the
    // queue and exits between messages.
    state.broadcaster.detach(id).await;
    finish_writer(id, writer).await;
}

/// Write queued payloads to the socket until the queue closes or the socket fails.
///
/// Only ever stops between messages. Returns how many were written.
async fn forward_outbound<S>(outbound: &mut mpsc::Receiver<Arc<str>>, mut sink: S) -> usize
where
    S: Sink<Message> + Unpin,
{
    let mut written = 0;
    while let Some(payload) = outbound.recv().await {
        if sink.send(Message::Text(payload.to_string())).await.is_err() {
            break;
        }
        written += 1;
    }
    let _ = sink.close().await;
    written
}

async fn finish_writer(id: ConnectionId, writer: JoinHandle<usize>) {
    match writer.await {
        Ok(written) => log::debug!("{}: writer finished after {} messages", id, written),
        Err(err) => log::debug!("{}: writer task ended abnormally: {}", id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_drains_queue_before_closing() {
        let (connection, mut outbound) = Connection::channel("socket-1", 4);
        for payload in ["first", "second", "third"] {
            connection
                .send(Arc::from(payload))
                .await
                .expect("queue has room");
        }
        drop(connection);

        let (sink, received) = futures::channel::mpsc::unbounded::<Message>();
        let written = forward_outbound(&mut outbound, sink).await;
        assert_eq!(written, 3);

        let texts: Vec<String> = received
            .map(|message| match message {
                Message::Text(text) => text,
                other => panic!("unexpected frame {:?}", other),
            })
            .collect()
            .await;
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn writer_stops_between_messages_when_socket_fails() {
        let (connection, mut outbound) = Connection::channel("socket-2", 4);
        connection.send(Arc::from("a")).await.expect("queue has room");
        connection.send(Arc::from("b")).await.expect("queue has room");

        let (sink, received) = futures::channel::mpsc::unbounded::<Message>();
        drop(received);
        let written = forward_outbound(&mut outbound, sink).await;
        assert_eq!(written, 0);
        // Later payloads stay queued untouched.
        assert_eq!(outbound.recv().await.as_deref(), Some("b"));
    }
}
