//! Durable entities persisted by the store

use crate::protocol::events::{ChatId, MessageId, MessageKind, UserId, UserStatus};
use crate::{current_timestamp, generate_id};

/// A registered user account
///
/// `status` and `last_seen` are a best-effort mirror of the live presence
/// registry and may be stale after an unclean shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: u64,
    pub active: bool,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            username: username.into(),
            status: UserStatus::Offline,
            last_seen: current_timestamp(),
            active: true,
        }
    }
}

/// A persisted message between two users
///
/// Never physically removed; `deleted` excludes it from all read paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub read: bool,
    pub read_at: Option<u64>,
    pub edited: bool,
    pub edited_at: Option<u64>,
    pub deleted: bool,
    pub deleted_at: Option<u64>,
    pub sent_at: u64,
}

impl Message {
    pub fn new(
        sender: impl Into<UserId>,
        receiver: impl Into<UserId>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: generate_id(),
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
            kind,
            read: false,
            read_at: None,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            sent_at: current_timestamp(),
        }
    }
}

/// A chat between a fixed participant set
///
/// Direct chats hold exactly two participants in canonical (sorted) order;
/// the participant vector generalizes to group chats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub participants: Vec<UserId>,
    pub last_message: Option<MessageId>,
    pub last_activity: u64,
}

impl Chat {
    /// Create a direct chat for an unordered pair
    pub fn direct(a: &str, b: &str) -> Self {
        let (first, second) = canonical_pair(a, b);
        Self {
            id: generate_id(),
            participants: vec![first, second],
            last_message: None,
            last_activity: current_timestamp(),
        }
    }

    /// Check whether a user belongs to this chat
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Canonicalize an unordered participant pair into a fixed order
///
/// Exactly one chat may exist per unordered pair; the sorted pair is its
/// unique key.
pub fn canonical_pair(a: &str, b: &str) -> (UserId, UserId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pair_is_order_insensitive() {
        assert_eq!(canonical_pair("alice", "bob"), canonical_pair("bob", "alice"));
        let (first, second) = canonical_pair("zoe", "anna");
        assert!(first <= second);
    }

    #[test]
    fn test_direct_chat_participants_sorted() {
        let chat = Chat::direct("zoe", "anna");
        assert_eq!(chat.participants, vec!["anna".to_string(), "zoe".to_string()]);
        assert!(chat.has_participant("zoe"));
        assert!(!chat.has_participant("carol"));
    }

    #[test]
    fn test_new_message_is_unread() {
        let msg = Message::new("a", "b", "hi", MessageKind::Text);
        assert!(!msg.read);
        assert!(msg.read_at.is_none());
        assert!(!msg.deleted);
        assert!(msg.sent_at > 0);
    }
}
