use std::sync::Arc;
use std::time::Instant;

use crate::directory::{OpenDirectory, UserDirectory};
use crate::heartbeat::HeartbeatConfig;
use crate::lifecycle::ConnectionLifecycle;
use crate::registry::ConnectionRegistry;
use crate::router::DeliveryRouter;
use crate::store::{InMemoryPendingStore, StoreHandle};

/// One relay instance. The registry and store are shared by every handler
/// and connection through this state; nothing lives in globals.
#[derive(Clone)]
pub struct AppState {
    start: Instant,
    registry: Arc<ConnectionRegistry>,
    store: StoreHandle,
    router: DeliveryRouter,
    directory: Arc<dyn UserDirectory>,
    heartbeat: HeartbeatConfig,
}

impl AppState {
    pub fn new(
        store: StoreHandle,
        directory: Arc<dyn UserDirectory>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = DeliveryRouter::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            start: Instant::now(),
            registry,
            store,
            router,
            directory,
            heartbeat,
        }
    }

    /// Volatile store, every username accepted.
    pub fn in_memory(heartbeat: HeartbeatConfig) -> Self {
        Self::new(
            Arc::new(InMemoryPendingStore::new()),
            Arc::new(OpenDirectory),
            heartbeat,
        )
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn router(&self) -> &DeliveryRouter {
        &self.router
    }

    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    pub fn lifecycle(&self) -> ConnectionLifecycle {
        ConnectionLifecycle::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            self.heartbeat,
        )
    }
}
