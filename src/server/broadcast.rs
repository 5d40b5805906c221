//! Presence broadcasting
//!
//! Connect, disconnect and status changes are announced to every other live
//! connection and mirrored into the durable store. The mirror write runs as
//! a detached task: broadcast ordering to live connections never waits on
//! the store.

use std::sync::Arc;

use tracing::warn;

use crate::current_timestamp;
use crate::protocol::events::{
    UserOffline, UserOnline, UserStatus, UserStatusChanged, UserSummary,
};
use crate::server::connection::Delivery;
use crate::server::presence::PresenceRegistry;
use crate::store::Store;

/// Fans presence changes out to all other live connections
pub struct PresenceBroadcaster {
    presence: Arc<PresenceRegistry>,
    store: Arc<dyn Store>,
}

impl PresenceBroadcaster {
    pub fn new(presence: Arc<PresenceRegistry>, store: Arc<dyn Store>) -> Self {
        Self { presence, store }
    }

    /// Announce that an identity came online
    pub async fn announce_online(&self, user: &UserSummary) {
        let now = current_timestamp();
        self.mirror(&user.user_id, UserStatus::Online, now);

        let event = UserOnline {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            status: UserStatus::Online,
            last_seen: now,
        };
        for entry in self.presence.snapshot().await {
            if entry.user_id == user.user_id {
                continue;
            }
            entry.handle.deliver(Delivery::UserOnline(event.clone()));
        }
    }

    /// Announce that an identity went offline
    pub async fn announce_offline(&self, user_id: &str, username: &str) {
        let now = current_timestamp();
        self.mirror(user_id, UserStatus::Offline, now);

        let event = UserOffline {
            user_id: user_id.to_string(),
            username: username.to_string(),
            status: UserStatus::Offline,
            last_seen: now,
        };
        for entry in self.presence.snapshot().await {
            if entry.user_id == user_id {
                continue;
            }
            entry.handle.deliver(Delivery::UserOffline(event.clone()));
        }
    }

    /// Announce that an identity changed its availability status
    pub async fn announce_status_changed(
        &self,
        user_id: &str,
        username: &str,
        status: UserStatus,
    ) {
        let now = current_timestamp();
        self.mirror(user_id, status, now);

        let event = UserStatusChanged {
            user_id: user_id.to_string(),
            username: username.to_string(),
            status,
            last_seen: now,
        };
        for entry in self.presence.snapshot().await {
            if entry.user_id == user_id {
                continue;
            }
            entry
                .handle
                .deliver(Delivery::UserStatusChanged(event.clone()));
        }
    }

    /// Mirror the status into the durable store, fire-and-forget
    fn mirror(&self, user_id: &str, status: UserStatus, last_seen: u64) {
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.update_user_status(&user_id, status, last_seen).await {
                warn!(user = %user_id, "status mirror write failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::presence::ConnectionHandle;
    use crate::store::{MemoryStore, User};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn summary(user: &User) -> UserSummary {
        UserSummary {
            user_id: user.id.clone(),
            username: user.username.clone(),
            status: UserStatus::Online,
            last_seen: user.last_seen,
        }
    }

    async fn wait_for_status(store: &MemoryStore, user_id: &str, status: UserStatus) {
        for _ in 0..50 {
            if let Some(user) = store.find_user(user_id).await.unwrap() {
                if user.status == status {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("status {:?} never mirrored for {}", status, user_id);
    }

    #[tokio::test]
    async fn test_online_announce_skips_the_subject() {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = PresenceBroadcaster::new(Arc::clone(&presence), Arc::clone(&store) as _);

        let alice = User::new("alice");
        let bob = User::new("bob");
        store.insert_user(alice.clone()).await;
        store.insert_user(bob.clone()).await;

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        presence
            .register(&summary(&alice), ConnectionHandle::new("conn-a", alice_tx))
            .await;
        presence
            .register(&summary(&bob), ConnectionHandle::new("conn-b", bob_tx))
            .await;

        broadcaster.announce_online(&summary(&alice)).await;

        match bob_rx.recv().await.unwrap() {
            Delivery::UserOnline(event) => {
                assert_eq!(event.user_id, alice.id);
                assert_eq!(event.username, "alice");
                assert_eq!(event.status, UserStatus::Online);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
        assert!(alice_rx.try_recv().is_err(), "subject must not hear itself");
    }

    #[tokio::test]
    async fn test_status_change_is_mirrored_to_store() {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = PresenceBroadcaster::new(Arc::clone(&presence), Arc::clone(&store) as _);

        let alice = User::new("alice");
        store.insert_user(alice.clone()).await;

        broadcaster
            .announce_status_changed(&alice.id, "alice", UserStatus::Busy)
            .await;

        wait_for_status(&store, &alice.id, UserStatus::Busy).await;
    }

    #[tokio::test]
    async fn test_offline_announce_reaches_remaining_connections() {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = PresenceBroadcaster::new(Arc::clone(&presence), Arc::clone(&store) as _);

        let alice = User::new("alice");
        let bob = User::new("bob");
        store.insert_user(alice.clone()).await;
        store.insert_user(bob.clone()).await;

        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        presence
            .register(&summary(&bob), ConnectionHandle::new("conn-b", bob_tx))
            .await;

        // Alice already deregistered; announce still reaches Bob
        broadcaster.announce_offline(&alice.id, "alice").await;

        match bob_rx.recv().await.unwrap() {
            Delivery::UserOffline(event) => {
                assert_eq!(event.user_id, alice.id);
                assert_eq!(event.status, UserStatus::Offline);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
        wait_for_status(&store, &alice.id, UserStatus::Offline).await;
    }
}
