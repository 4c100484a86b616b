use dashmap::DashMap;
use tracing::debug;

use crate::connection::{ConnectionHandle, ConnectionId};

/// username -> live connection. Each call is a single critical section on
/// the owning shard; handles are cloned out so no guard outlives the call.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `user`. A superseded handle is only
    /// dropped from the map; closing it is its own lifecycle's job.
    pub fn register(&self, user: &str, handle: ConnectionHandle) {
        let id = handle.id();
        if let Some(previous) = self.connections.insert(user.to_string(), handle) {
            debug!(
                user = %user,
                previous = %previous.id(),
                current = %id,
                "connection superseded"
            );
        }
    }

    pub fn lookup(&self, user: &str) -> Option<ConnectionHandle> {
        self.connections
            .get(user)
            .map(|entry| entry.value().clone())
    }

    /// Idempotent; returns whether an entry was removed.
    pub fn unregister(&self, user: &str) -> bool {
        self.connections.remove(user).is_some()
    }

    /// Removes the entry only while it still points at connection `id`, so a
    /// stale connection cannot evict the one that replaced it.
    pub fn unregister_if(&self, user: &str, id: ConnectionId) -> bool {
        self.connections
            .remove_if(user, |_, handle| handle.id() == id)
            .is_some()
    }

    pub fn contains(&self, user: &str) -> bool {
        self.connections.contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::testing::RecordingSink;

    fn handle(user: &str) -> ConnectionHandle {
        ConnectionHandle::new(user, RecordingSink::new())
    }

    #[test_timeout::timeout]
    fn register_replaces_existing_entry() {
        let registry = ConnectionRegistry::new();
        let first = handle("alice");
        let second = handle("alice");

        registry.register("alice", first.clone());
        registry.register("alice", second.clone());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alice").unwrap().id(), second.id());
        assert!(registry.lookup("bob").is_none());
    }

    #[test_timeout::timeout]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.register("alice", handle("alice"));

        assert!(registry.unregister("alice"));
        assert!(registry.lookup("alice").is_none());
        assert!(!registry.unregister("alice"));
        assert!(registry.lookup("alice").is_none());
        assert!(!registry.unregister("never-seen"));
    }

    #[test_timeout::timeout]
    fn stale_connection_cannot_evict_its_replacement() {
        let registry = ConnectionRegistry::new();
        let stale = handle("alice");
        let fresh = handle("alice");
        registry.register("alice", stale.clone());
        registry.register("alice", fresh.clone());

        assert!(!registry.unregister_if("alice", stale.id()));
        assert_eq!(registry.lookup("alice").unwrap().id(), fresh.id());

        assert!(registry.unregister_if("alice", fresh.id()));
        assert!(registry.is_empty());
    }

    #[test_timeout::timeout]
    fn concurrent_registrations_leave_exactly_one_winner() {
        for _ in 0..50 {
            let registry = Arc::new(ConnectionRegistry::new());
            let h1 = handle("u");
            let h2 = handle("u");
            let candidates = [h1.id(), h2.id()];

            let threads: Vec<_> = [h1, h2]
                .into_iter()
                .map(|h| {
                    let registry = Arc::clone(&registry);
                    std::thread::spawn(move || registry.register("u", h))
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }

            assert_eq!(registry.len(), 1);
            let winner = registry.lookup("u").expect("one handle registered");
            assert!(candidates.contains(&winner.id()));
        }
    }
}
