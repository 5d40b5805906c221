//! Presence registry: the authoritative identity -> live-connection table
//!
//! Every connection handler touches this structure, so all operations go
//! through one coarse lock; map accesses are O(1) and only `snapshot` walks
//! the table. Register/deregister for the same identity are linearizable,
//! which is what makes "at most one entry per identity, newest wins" hold.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use crate::current_timestamp;
use crate::protocol::events::{UserId, UserStatus, UserSummary};
use crate::server::connection::Delivery;

/// Weak reference to a connection's outbound queue
///
/// Owned by the gateway; the registry and the fan-out engine only look it up
/// and push deliveries, never manage its lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ConnectionHandle {
    pub fn new(conn_id: impl Into<String>, tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            conn_id: conn_id.into(),
            tx,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Queue a delivery on this connection
    ///
    /// Returns false when the connection has already gone away; callers
    /// treat that as a best-effort miss, never an error.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }
}

/// Live presence state for one identity
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub username: String,
    pub handle: ConnectionHandle,
    pub status: UserStatus,
    pub last_seen: u64,
}

/// In-process mapping from identity to its single live connection
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an identity, replacing any existing entry
    ///
    /// Returns the superseded connection handle, if any, so the caller can
    /// invalidate it. The superseded connection's later events no longer
    /// reach this identity's entry (see [`deregister`](Self::deregister) and
    /// [`set_status`](Self::set_status)).
    pub async fn register(
        &self,
        user: &UserSummary,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(
            user.user_id.clone(),
            PresenceEntry {
                user_id: user.user_id.clone(),
                username: user.username.clone(),
                handle,
                status: UserStatus::Online,
                last_seen: current_timestamp(),
            },
        );
        previous.map(|entry| entry.handle)
    }

    /// Remove the entry for an identity, but only if the given connection
    /// still owns it
    ///
    /// Idempotent: a stale disconnect arriving after supersession matches
    /// nothing and returns false.
    pub async fn deregister(&self, user_id: &str, conn_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(user_id) {
            Some(entry) if entry.handle.conn_id() == conn_id => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Remove and return whichever entry the given connection owns
    ///
    /// Disconnect cleanup path; carries the same supersession guard as
    /// [`deregister`](Self::deregister).
    pub async fn deregister_conn(&self, conn_id: &str) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().await;
        let user_id = entries
            .values()
            .find(|entry| entry.handle.conn_id() == conn_id)
            .map(|entry| entry.user_id.clone())?;
        entries.remove(&user_id)
    }

    /// Resolve an identity to its live connection handle
    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        let entries = self.entries.read().await;
        entries.get(user_id).map(|entry| entry.handle.clone())
    }

    /// Update an identity's ephemeral status, guarded by connection ownership
    ///
    /// No-op (returns false) when the identity is absent or the entry is
    /// owned by a newer connection.
    pub async fn set_status(&self, user_id: &str, conn_id: &str, status: UserStatus) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(user_id) {
            Some(entry) if entry.handle.conn_id() == conn_id => {
                entry.status = status;
                entry.last_seen = current_timestamp();
                true
            }
            _ => false,
        }
    }

    /// Snapshot of all live entries, ordered by user ID
    pub async fn snapshot(&self) -> Vec<PresenceEntry> {
        let entries = self.entries.read().await;
        let mut all: Vec<PresenceEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    /// Number of currently registered identities
    pub async fn online_count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn summary(user_id: &str) -> UserSummary {
        UserSummary {
            user_id: user_id.to_string(),
            username: format!("name-{}", user_id),
            status: UserStatus::Online,
            last_seen: 0,
        }
    }

    fn handle(conn_id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(conn_id, tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = PresenceRegistry::new();
        let (h, _rx) = handle("conn-1");

        assert!(registry.register(&summary("alice"), h).await.is_none());
        assert!(registry.lookup("alice").await.is_some());
        assert!(registry.lookup("bob").await.is_none());
        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_newer_connection_supersedes() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = handle("conn-old");
        let (new, _rx2) = handle("conn-new");

        assert!(registry.register(&summary("alice"), old).await.is_none());
        let superseded = registry.register(&summary("alice"), new).await.unwrap();
        assert_eq!(superseded.conn_id(), "conn-old");

        // Still exactly one entry, owned by the newer connection
        assert_eq!(registry.online_count().await, 1);
        let current = registry.lookup("alice").await.unwrap();
        assert_eq!(current.conn_id(), "conn-new");
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_remove_new_entry() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = handle("conn-old");
        let (new, _rx2) = handle("conn-new");

        registry.register(&summary("alice"), old).await;
        registry.register(&summary("alice"), new).await;

        // Disconnect of the superseded connection arrives late
        assert!(!registry.deregister("alice", "conn-old").await);
        assert!(registry.lookup("alice").await.is_some());

        assert!(registry.deregister("alice", "conn-new").await);
        assert!(registry.lookup("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_connection_cannot_mutate_status() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = handle("conn-old");
        let (new, _rx2) = handle("conn-new");

        registry.register(&summary("alice"), old).await;
        registry.register(&summary("alice"), new).await;

        assert!(!registry.set_status("alice", "conn-old", UserStatus::Busy).await);
        assert!(registry.set_status("alice", "conn-new", UserStatus::Busy).await);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].status, UserStatus::Busy);

        assert!(!registry.set_status("nobody", "conn-new", UserStatus::Away).await);
    }

    #[tokio::test]
    async fn test_deregister_conn_finds_owned_entry() {
        let registry = PresenceRegistry::new();
        let (h, _rx) = handle("conn-1");
        registry.register(&summary("alice"), h).await;

        assert!(registry.deregister_conn("conn-other").await.is_none());

        let removed = registry.deregister_conn("conn-1").await.unwrap();
        assert_eq!(removed.user_id, "alice");
        assert_eq!(registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let registry = PresenceRegistry::new();
        for user in ["carol", "alice", "bob"] {
            let (h, _rx) = handle(user);
            registry.register(&summary(user), h).await;
        }

        let ids: Vec<String> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|e| e.user_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_concurrent_lifecycles_keep_single_entry() {
        let registry = Arc::new(PresenceRegistry::new());

        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let conn_id = format!("conn-{}", i);
                let (h, _rx) = handle(&conn_id);
                registry.register(&summary("alice"), h).await;
                if i % 2 == 0 {
                    registry.deregister("alice", &conn_id).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Whatever the interleaving, never more than one entry per identity
        assert!(registry.online_count().await <= 1);
    }
}
