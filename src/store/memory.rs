//! In-process store implementation
//!
//! Backs the dev server and the test suite. A single coarse lock guards all
//! tables, which keeps the pair-uniqueness check and chat insertion atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{canonical_pair, Chat, Message, User};
use super::{Store, StoreError};
use crate::protocol::events::{ChatId, MessageId, UserId, UserStatus};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    messages: HashMap<MessageId, Message>,
    chats: HashMap<ChatId, Chat>,
    /// Canonical participant pair -> chat ID (uniqueness index)
    chat_pairs: HashMap<(UserId, UserId), ChatId>,
}

/// In-memory [`Store`] implementation
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user record (test and dev-server setup)
    pub async fn insert_user(&self, user: User) {
        let mut tables = self.tables.write().await;
        tables.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(user_id).cloned())
    }

    async fn update_user_status(
        &self,
        user_id: &str,
        status: UserStatus,
        last_seen: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(user_id).ok_or(StoreError::Missing)?;
        user.status = status;
        user.last_seen = last_seen;
        Ok(())
    }

    async fn create_message(&self, message: Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.messages.contains_key(&message.id) {
            return Err(StoreError::Conflict);
        }
        tables.messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .get(message_id)
            .filter(|m| !m.deleted)
            .cloned())
    }

    async fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.messages.contains_key(&message.id) {
            return Err(StoreError::Missing);
        }
        tables.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn find_chat(&self, chat_id: &str) -> Result<Option<Chat>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.chats.get(chat_id).cloned())
    }

    async fn find_chat_by_participants(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Chat>, StoreError> {
        let tables = self.tables.read().await;
        let key = canonical_pair(a, b);
        Ok(tables
            .chat_pairs
            .get(&key)
            .and_then(|id| tables.chats.get(id))
            .cloned())
    }

    async fn create_chat(&self, a: &str, b: &str) -> Result<Chat, StoreError> {
        let mut tables = self.tables.write().await;
        let key = canonical_pair(a, b);

        // Uniqueness index consulted and updated under one write lock, so a
        // racing creator observes the winner instead of inserting a duplicate.
        if let Some(existing_id) = tables.chat_pairs.get(&key) {
            let existing = tables
                .chats
                .get(existing_id)
                .cloned()
                .ok_or(StoreError::Missing)?;
            return Ok(existing);
        }

        let chat = Chat::direct(a, b);
        tables.chat_pairs.insert(key, chat.id.clone());
        tables.chats.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn update_chat_last_message(
        &self,
        chat_id: &str,
        message_id: &str,
        at: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let chat = tables.chats.get_mut(chat_id).ok_or(StoreError::Missing)?;
        chat.last_message = Some(message_id.to_string());
        chat.last_activity = at;
        Ok(())
    }

    async fn list_messages_between(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| !m.deleted)
            .filter(|m| {
                (m.sender == a && m.receiver == b) || (m.sender == b && m.receiver == a)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sent_at);
        messages.truncate(limit);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::events::MessageKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_user_status_mirror() {
        let store = MemoryStore::new();
        let user = User::new("alice");
        let user_id = user.id.clone();
        store.insert_user(user).await;

        store
            .update_user_status(&user_id, UserStatus::Away, 42)
            .await
            .unwrap();

        let found = store.find_user(&user_id).await.unwrap().unwrap();
        assert_eq!(found.status, UserStatus::Away);
        assert_eq!(found.last_seen, 42);

        assert_eq!(
            store.update_user_status("nope", UserStatus::Online, 1).await,
            Err(StoreError::Missing)
        );
    }

    #[tokio::test]
    async fn test_create_chat_is_unique_per_pair() {
        let store = MemoryStore::new();

        let first = store.create_chat("alice", "bob").await.unwrap();
        let second = store.create_chat("bob", "alice").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            store
                .find_chat_by_participants("alice", "bob")
                .await
                .unwrap()
                .unwrap()
                .id,
            first.id
        );
    }

    #[tokio::test]
    async fn test_concurrent_chat_creation_yields_one_record() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create_chat("alice", "bob").await.unwrap().id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "racing creators must converge on one chat");
    }

    #[tokio::test]
    async fn test_soft_deleted_messages_are_invisible() {
        let store = MemoryStore::new();

        let mut msg = Message::new("alice", "bob", "hello", MessageKind::Text);
        let id = msg.id.clone();
        store.create_message(msg.clone()).await.unwrap();

        assert!(store.find_message(&id).await.unwrap().is_some());

        msg.deleted = true;
        msg.deleted_at = Some(crate::current_timestamp());
        store.update_message(&msg).await.unwrap();

        assert!(store.find_message(&id).await.unwrap().is_none());
        let listed = store.list_messages_between("alice", "bob", 50).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_list_messages_between_orders_by_sent_at() {
        let store = MemoryStore::new();

        let mut first = Message::new("alice", "bob", "one", MessageKind::Text);
        first.sent_at = 100;
        let mut second = Message::new("bob", "alice", "two", MessageKind::Text);
        second.sent_at = 200;
        let unrelated = Message::new("carol", "bob", "three", MessageKind::Text);

        store.create_message(second.clone()).await.unwrap();
        store.create_message(first.clone()).await.unwrap();
        store.create_message(unrelated).await.unwrap();

        let listed = store.list_messages_between("alice", "bob", 50).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "one");
        assert_eq!(listed[1].content, "two");
    }
}
