use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::StoreBackend;
use crate::metrics;
use crate::protocol::NotificationPayload;
use crate::store::{PendingStore, StoreError};

const KEY_PREFIX: &str = "notify-relay:pending";

/// Pending queues kept as redis lists, one key per user. Each list is
/// refreshed to `ttl_seconds` on every write.
pub struct RedisPendingStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    ttl_seconds: u64,
}

impl RedisPendingStore {
    /// Does not touch the network; the connection is established on first use.
    pub fn connect(url: &str, ttl_seconds: u64) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            ttl_seconds,
        })
    }

    async fn conn(&self) -> redis::RedisResult<ConnectionManager> {
        self.conn
            .get_or_try_init(|| self.client.get_connection_manager())
            .await
            .cloned()
    }

    fn key(user: &str) -> String {
        format!("{KEY_PREFIX}:{user}")
    }
}

#[async_trait]
impl PendingStore for RedisPendingStore {
    async fn enqueue(&self, user: &str, payload: NotificationPayload) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let key = Self::key(user);
        redis::pipe()
            .cmd("RPUSH")
            .arg(&key)
            .arg(payload.as_str())
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        metrics::PENDING_ENQUEUED.inc();
        debug!(user = %user, "stored notification for offline user in redis");
        Ok(())
    }

    async fn drain_and_clear(&self, user: &str) -> Result<Vec<NotificationPayload>, StoreError> {
        let mut conn = self.conn().await?;
        let key = Self::key(user);
        // MULTI/EXEC so an RPUSH cannot land between the read and the delete.
        let (items,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(items
            .into_iter()
            .map(NotificationPayload::from_stored)
            .collect())
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
        let mut conn = self.conn().await?;
        let key = Self::key(user);
        // LPUSH inserts left to right, so push in reverse to keep batch order.
        let reversed: Vec<&str> = batch.iter().rev().map(NotificationPayload::as_str).collect();
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(reversed)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        metrics::DRAIN_REQUEUED.inc_by(count as u64);
        Ok(())
    }

    async fn pending_len(&self, user: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        let len: usize = conn.llen(Self::key(user)).await?;
        Ok(len)
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }
}
