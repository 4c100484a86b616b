use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::metrics;
use crate::protocol::Frame;

/// Upper bound on one write to a peer, lock wait included.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection already closed")]
    Closed,
    #[error("write failed: {0}")]
    Write(String),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// Write half of one peer connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
}

pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WebSocketSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Data(payload) => Message::Text(payload.as_str().to_owned()),
            Frame::Probe => Message::Ping(Vec::new()),
            Frame::Close => Message::Close(None),
        };
        self.inner
            .send(message)
            .await
            .map_err(|err| TransportError::Write(err.to_string()))
    }
}

struct Shared {
    id: ConnectionId,
    user: Arc<str>,
    write_timeout: Duration,
    // `None` once the connection has been released.
    sink: Mutex<Option<Box<dyn FrameSink>>>,
}

/// Addressable endpoint of one live session. Clones refer to the same
/// connection and share its write lock, so probe frames and relayed payloads
/// never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn new(user: impl Into<Arc<str>>, sink: impl FrameSink + 'static) -> Self {
        Self::with_write_timeout(user, sink, DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_write_timeout(
        user: impl Into<Arc<str>>,
        sink: impl FrameSink + 'static,
        write_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ConnectionId::new(),
                user: user.into(),
                write_timeout,
                sink: Mutex::new(Some(Box::new(sink))),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn user(&self) -> &str {
        &self.shared.user
    }

    /// Writes one frame. Waiting for the write lock and the write itself
    /// share a single deadline. A write that times out may have left a
    /// partial frame on the wire, so the connection is released.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let limit = self.shared.write_timeout;
        let deadline = Instant::now() + limit;
        let Ok(mut guard) = timeout_at(deadline, self.shared.sink.lock()).await else {
            return Err(self.timed_out(limit));
        };
        let Some(sink) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };
        let written = timeout_at(deadline, sink.send_frame(frame)).await;
        match written {
            Ok(result) => result,
            Err(_) => {
                guard.take();
                Err(self.timed_out(limit))
            }
        }
    }

    /// Sends a close frame and drops the write half. Later writes fail with
    /// [`TransportError::Closed`].
    pub async fn close(&self) {
        let mut guard = self.shared.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = timeout(self.shared.write_timeout, sink.send_frame(Frame::Close)).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_closed(&self) -> bool {
        self.shared.sink.lock().await.is_none()
    }

    fn timed_out(&self, limit: Duration) -> TransportError {
        metrics::WRITE_TIMEOUTS.inc();
        warn!(
            user = %self.shared.user,
            connection = %self.shared.id,
            timeout_ms = limit.as_millis() as u64,
            "peer write timed out"
        );
        TransportError::Timeout(limit)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("user", &self.shared.user)
            .finish()
    }
}
