//! Live chat-room membership
//!
//! Rooms are membership facts over live connections, not durable state: the
//! chat record itself lives in the store, this table only remembers which
//! identities joined which chat channel while connected.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::protocol::events::{ChatId, UserId};

#[derive(Default)]
struct Membership {
    /// Chat ID -> identities currently joined
    members: HashMap<ChatId, HashSet<UserId>>,
    /// Identity -> chats joined (for fast disconnect purge)
    user_rooms: HashMap<UserId, HashSet<ChatId>>,
}

/// Tracks which live identities joined which chat room channel
#[derive(Default)]
pub struct ChatRooms {
    inner: RwLock<Membership>,
}

impl ChatRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a membership (the capability check happened upstream)
    pub async fn join(&self, chat_id: &str, user_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .members
            .entry(chat_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        inner
            .user_rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(chat_id.to_string());
    }

    /// Check membership
    pub async fn is_member(&self, chat_id: &str, user_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .members
            .get(chat_id)
            .map(|set| set.contains(user_id))
            .unwrap_or(false)
    }

    /// Identities currently joined to a chat room
    pub async fn members(&self, chat_id: &str) -> Vec<UserId> {
        let inner = self.inner.read().await;
        inner
            .members
            .get(chat_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove an identity from every room it joined (disconnect cleanup)
    ///
    /// Returns the chats it was removed from.
    pub async fn remove_user(&self, user_id: &str) -> Vec<ChatId> {
        let mut inner = self.inner.write().await;
        let chat_ids: Vec<ChatId> = inner
            .user_rooms
            .remove(user_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for chat_id in &chat_ids {
            if let Some(set) = inner.members.get_mut(chat_id) {
                set.remove(user_id);
                if set.is_empty() {
                    inner.members.remove(chat_id);
                }
            }
        }
        chat_ids
    }
}
