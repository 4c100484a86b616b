use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StoreBackend;
use crate::metrics;
use crate::protocol::NotificationPayload;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Undelivered notifications, one FIFO queue per user.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Appends to the tail of `user`'s queue, creating it if needed.
    async fn enqueue(&self, user: &str, payload: NotificationPayload) -> Result<(), StoreError>;

    /// Removes and returns the whole queue in enqueue order. Leaves no entry
    /// behind; an absent queue yields an empty batch.
    async fn drain_and_clear(&self, user: &str) -> Result<Vec<NotificationPayload>, StoreError>;

    /// Puts an undelivered remainder back at the head of the queue, ahead of
    /// anything enqueued since the drain, keeping the batch order.
    async fn requeue_front(
        &self,
        user: &str,
        batch: Vec<NotificationPayload>,
    ) -> Result<(), StoreError>;

    async fn pending_len(&self, user: &str) -> Result<usize, StoreError>;

    fn backend(&self) -> StoreBackend;
}

pub type StoreHandle = Arc<dyn PendingStore>;

pub fn build_store(
    backend: &StoreBackend,
    redis_url: Option<&str>,
    pending_ttl_secs: u64,
) -> StoreHandle {
    match backend {
        StoreBackend::InMemory => Arc::new(InMemoryPendingStore::new()),
        StoreBackend::Redis => {
            if let Some(url) = redis_url {
                match crate::store_redis::RedisPendingStore::connect(url, pending_ttl_secs) {
                    Ok(store) => return Arc::new(store),
                    Err(err) => {
                        warn!(error = %err, "failed to init redis pending store; falling back to memory")
                    }
                }
            } else {
                warn!("NOTIFY_RELAY_STORE_BACKEND=redis but REDIS_URL missing; falling back to in-memory");
            }
            Arc::new(InMemoryPendingStore::new())
        }
    }
}

/// Volatile store; contents are lost on restart.
#[derive(Default)]
pub struct InMemoryPendingStore {
    queues: Mutex<HashMap<String, VecDeque<NotificationPayload>>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn users_with_pending(&self) -> usize {
        self.queues.lock().len()
    }
}

#[async_trait]
impl PendingStore for InMemoryPendingStore {
    async fn enqueue(&self, user: &str, payload: NotificationPayload) -> Result<(), StoreError> {
        let depth = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(user.to_string()).or_default();
            queue.push_back(payload);
            queue.len()
        };
        metrics::PENDING_ENQUEUED.inc();
        debug!(user = %user, depth, "stored notification for offline user");
        Ok(())
    }

    async fn drain_and_clear(&self, user: &str) -> Result<Vec<NotificationPayload>, StoreError> {
        let drained = self.queues.lock().remove(user);
        Ok(drained.map(Vec::from).unwrap_or_default())
    }

    async fn requeue_front(
        &self,
        user: &str,
        batch: Vec<NotificationPayload>,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        {
            let mut queues = self.queues.lock();
            let queue = queues.entry(user.to_string()).or_default();
            for payload in batch.into_iter().rev() {
                queue.push_front(payload);
            }
        }
        metrics::DRAIN_REQUEUED.inc_by(count as u64);
        Ok(())
    }

    async fn pending_len(&self, user: &str) -> Result<usize, StoreError> {
        Ok(self.queues.lock().get(user).map_or(0, VecDeque::len))
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::InMemory
    }
}
