//! Durable store abstraction
//!
//! The chat core never talks to a database directly; it goes through the
//! [`Store`] trait, which exposes the narrow create/find/update surface the
//! engines need. Implementations own record-level atomicity; no multi-record
//! transaction is assumed.

pub mod memory;
pub mod models;

pub use memory::MemoryStore;
pub use models::{canonical_pair, Chat, Message, User};

use crate::protocol::events::UserStatus;
use async_trait::async_trait;
use std::fmt::{self, Display, Formatter};

/// Store-level failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record required by the operation does not exist
    Missing,
    /// Uniqueness constraint violated
    Conflict,
    /// Backend unavailable or rejected the operation
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing record"),
            Self::Conflict => write!(f, "uniqueness conflict"),
            Self::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Narrow persistence interface consumed by the chat core
///
/// Deleted messages are excluded from every read method.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a user by ID
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Mirror a user's availability and last-seen timestamp
    async fn update_user_status(
        &self,
        user_id: &str,
        status: UserStatus,
        last_seen: u64,
    ) -> Result<(), StoreError>;

    /// Persist a new message record
    async fn create_message(&self, message: Message) -> Result<(), StoreError>;

    /// Look up a message by ID (soft-deleted messages are invisible)
    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, StoreError>;

    /// Replace a message record (read/edit/delete mutations)
    async fn update_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Look up a chat by ID
    async fn find_chat(&self, chat_id: &str) -> Result<Option<Chat>, StoreError>;

    /// Look up the direct chat for an unordered participant pair
    async fn find_chat_by_participants(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Chat>, StoreError>;

    /// Create the direct chat for an unordered participant pair
    ///
    /// Create-or-fetch-on-conflict: when a concurrent caller already created
    /// the chat for the same pair, the existing record is returned instead of
    /// a duplicate. This is the uniqueness safeguard for racing first
    /// messages.
    async fn create_chat(&self, a: &str, b: &str) -> Result<Chat, StoreError>;

    /// Record a chat's newest message and bump its activity timestamp
    async fn update_chat_last_message(
        &self,
        chat_id: &str,
        message_id: &str,
        at: u64,
    ) -> Result<(), StoreError>;

    /// List messages exchanged between two users, oldest first
    /// (soft-deleted messages excluded)
    async fn list_messages_between(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}
