use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("connection {0} did not accept a message within {1:?}")]
    Timeout(ConnectionId, Duration),
}

/// Result of a non-blocking push from the broadcast loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Outbound queue is full; this pass is skipped for the connection.
    Lagging,
    Closed,
}

/// Handle to one attached client: a bounded outbound queue plus identifiers.
///
/// The transport adapter owns the receiving half and writes queued payloads to
/// the socket. Dropping every `Connection` clone closes the queue.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    client_id: Arc<str>,
    outbound: mpsc::Sender<Arc<str>>,
}

impl Connection {
    /// New connection with an outbound queue of `depth` messages.
    pub fn channel(client_id: &str, depth: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (outbound, rx) = mpsc::channel(depth.max(1));
        let connection = Self {
            id: ConnectionId::next(),
            client_id: Arc::from(client_id),
            outbound,
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queue a direct response, waiting briefly for room.
    pub async fn send(&self, payload: Arc<str>) -> Result<(), TransportError> {
        match tokio::time::timeout(SEND_TIMEOUT, self.outbound.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Closed(self.id)),
            Err(_) => Err(TransportError::Timeout(self.id, SEND_TIMEOUT)),
        }
    }

    /// Queue a broadcast payload without waiting.
    pub fn push(&self, payload: Arc<str>) -> PushOutcome {
        match self.outbound.try_send(payload) {
            Ok(()) => PushOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Lagging,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}
