//! Owns one connection from upgrade to release: register, drain stored
//! notifications, supervise liveness, read until the peer is gone, clean up.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionHandle, TransportError, WebSocketSink};
use crate::heartbeat::{self, HeartbeatConfig, LivenessDeadline};
use crate::metrics;
use crate::protocol::Frame;
use crate::registry::ConnectionRegistry;
use crate::store::StoreHandle;

/// Why a read loop ended. Every variant leads to the same cleanup.
#[derive(Debug)]
pub enum ReadLoopExit {
    PeerClosed,
    StreamEnded,
    TimedOut,
    ReadError(String),
    ProbeFailed(TransportError),
}

impl fmt::Display for ReadLoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadLoopExit::PeerClosed => f.write_str("peer sent close"),
            ReadLoopExit::StreamEnded => f.write_str("stream ended"),
            ReadLoopExit::TimedOut => f.write_str("liveness window elapsed"),
            ReadLoopExit::ReadError(err) => write!(f, "read error: {err}"),
            ReadLoopExit::ProbeFailed(err) => write!(f, "probe failed: {err}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub requeued: usize,
}

#[derive(Clone)]
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    store: StoreHandle,
    heartbeat: HeartbeatConfig,
}

impl ConnectionLifecycle {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: StoreHandle,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            store,
            heartbeat,
        }
    }

    /// Entry point for an upgraded socket.
    pub async fn serve(self, socket: WebSocket, user: String) {
        let (sink, stream) = socket.split();
        let handle = ConnectionHandle::with_write_timeout(
            user,
            WebSocketSink::new(sink),
            self.heartbeat.write_timeout(),
        );
        self.run(handle, stream).await;
    }

    pub async fn run<S>(&self, handle: ConnectionHandle, stream: S) -> ReadLoopExit
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let registration = Registration::new(Arc::clone(&self.registry), handle.clone());
        info!(user = %handle.user(), connection = %handle.id(), "connection registered");

        let mut probe = heartbeat::spawn_probe_task(handle.clone(), self.heartbeat.probe_period());
        // Not aborted on exit: once the handle is closed its writes fail and
        // the remainder goes back to the store.
        let _drain: JoinHandle<DrainReport> =
            tokio::spawn(drain_pending(Arc::clone(&self.store), handle.clone()));

        let exit = read_loop(&handle, stream, &mut probe, self.heartbeat.liveness_window()).await;
        probe.abort();

        if matches!(exit, ReadLoopExit::TimedOut) {
            metrics::HEARTBEAT_TIMEOUTS.inc();
        }
        info!(
            user = %handle.user(),
            connection = %handle.id(),
            reason = %exit,
            "connection closing"
        );
        drop(registration);
        handle.close().await;
        exit
    }
}

/// Registry entry scoped to one connection; removed on drop, including when
/// the owning task is cancelled or panics.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl Registration {
    fn new(registry: Arc<ConnectionRegistry>, handle: ConnectionHandle) -> Self {
        registry.register(handle.user(), handle.clone());
        metrics::CONNECTIONS_TOTAL.inc();
        metrics::CONNECTIONS_ACTIVE.inc();
        Self { registry, handle }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self
            .registry
            .unregister_if(self.handle.user(), self.handle.id());
        metrics::CONNECTIONS_ACTIVE.dec();
        debug!(
            user = %self.handle.user(),
            connection = %self.handle.id(),
            removed,
            "connection unregistered"
        );
    }
}

async fn read_loop<S>(
    handle: &ConnectionHandle,
    mut stream: S,
    probe: &mut JoinHandle<TransportError>,
    window: Duration,
) -> ReadLoopExit
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut liveness = LivenessDeadline::arm(window);
    let expiry = tokio::time::sleep_until(liveness.deadline());
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            next = stream.next() => match next {
                None => return ReadLoopExit::StreamEnded,
                Some(Err(err)) => return ReadLoopExit::ReadError(err.to_string()),
                Some(Ok(Message::Close(_))) => return ReadLoopExit::PeerClosed,
                Some(Ok(message)) => {
                    trace!(
                        user = %handle.user(),
                        kind = message_kind(&message),
                        "inbound frame; liveness rearmed"
                    );
                    liveness.rearm();
                    expiry.as_mut().reset(liveness.deadline());
                }
            },
            () = &mut expiry => return ReadLoopExit::TimedOut,
            probe_exit = &mut *probe => {
                return match probe_exit {
                    Ok(err) => ReadLoopExit::ProbeFailed(err),
                    Err(join_err) => ReadLoopExit::ProbeFailed(TransportError::Write(join_err.to_string())),
                };
            }
        }
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}

/// Delivers everything stored for the handle's user, oldest first. Stops at
/// the first failed write and puts that payload and the rest back at the
/// head of the queue.
pub async fn drain_pending(store: StoreHandle, handle: ConnectionHandle) -> DrainReport {
    let user = handle.user().to_owned();
    let batch = match store.drain_and_clear(&user).await {
        Ok(batch) => batch,
        Err(err) => {
            warn!(user = %user, error = %err, "failed to read stored notifications");
            return DrainReport::default();
        }
    };
    if batch.is_empty() {
        return DrainReport::default();
    }
    info!(user = %user, count = batch.len(), "delivering stored notifications");

    let mut report = DrainReport::default();
    let mut remaining = batch.into_iter();
    while let Some(payload) = remaining.next() {
        if let Err(err) = handle.send(Frame::Data(payload.clone())).await {
            let undelivered: Vec<_> = std::iter::once(payload).chain(remaining).collect();
            report.requeued = undelivered.len();
            warn!(
                user = %user,
                error = %err,
                delivered = report.delivered,
                requeued = report.requeued,
                "stored notification delivery failed; requeueing remainder"
            );
            if let Err(err) = store.requeue_front(&user, undelivered).await {
                warn!(user = %user, error = %err, "failed to requeue undelivered notifications");
            }
            break;
        }
        report.delivered += 1;
        metrics::DRAIN_DELIVERED.inc();
    }
    report
}
