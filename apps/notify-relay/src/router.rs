use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::protocol::{Frame, NotificationPayload};
use crate::registry::ConnectionRegistry;
use crate::store::{StoreError, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Written to the user's live connection.
    Delivered,
    /// User had no connection; stored for later.
    Queued,
    /// The live write failed; connection dropped and payload stored.
    FallbackQueued,
}

impl RouteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteOutcome::Delivered => "online",
            RouteOutcome::Queued => "offline",
            RouteOutcome::FallbackQueued => "fallback",
        }
    }
}

/// Single entry point for pushing a notification at a user.
#[derive(Clone)]
pub struct DeliveryRouter {
    registry: Arc<ConnectionRegistry>,
    store: StoreHandle,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, store: StoreHandle) -> Self {
        Self { registry, store }
    }

    /// Makes at most one write attempt. A failed write is taken as a dead
    /// peer: the connection is unregistered and the payload stored instead.
    pub async fn route(
        &self,
        user: &str,
        payload: NotificationPayload,
    ) -> Result<RouteOutcome, StoreError> {
        // `lookup` clones the handle out, so no registry lock is held below.
        let outcome = match self.registry.lookup(user) {
            Some(handle) => match handle.send(Frame::Data(payload.clone())).await {
                Ok(()) => {
                    info!(user = %user, connection = %handle.id(), "notification delivered");
                    RouteOutcome::Delivered
                }
                Err(err) => {
                    warn!(
                        user = %user,
                        connection = %handle.id(),
                        error = %err,
                        "live write failed; dropping connection and storing notification"
                    );
                    self.registry.unregister_if(user, handle.id());
                    self.store.enqueue(user, payload).await?;
                    RouteOutcome::FallbackQueued
                }
            },
            None => {
                debug!(user = %user, "user offline; storing notification");
                self.store.enqueue(user, payload).await?;
                RouteOutcome::Queued
            }
        };
        metrics::ROUTE_OUTCOMES
            .with_label_values(&[outcome.as_str()])
            .inc();
        Ok(outcome)
    }
}
