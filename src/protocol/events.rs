//! Protocol event payloads for the chat system
//!
//! One typed struct per wire event, serialized as JSON inside frames.
//! Unknown or malformed payloads are rejected at the decode boundary.

use serde::{Deserialize, Serialize};

/// Unique identifier types (opaque strings)
pub type UserId = String;
pub type MessageId = String;
pub type ChatId = String;

/// User availability as seen by other clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    Away,
    Busy,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
            UserStatus::Away => "away",
            UserStatus::Busy => "busy",
        }
    }
}

/// Message content classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Audio,
}

// =============================================================================
// Client -> Server
// =============================================================================

/// Handshake: present a bearer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticate {
    /// Opaque bearer token
    pub token: String,
}

/// Join a chat room channel (capability-checked server-side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinChat {
    pub chat_id: ChatId,
}

/// Send a message to another user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    /// Recipient user ID
    pub to: UserId,
    /// Message content
    pub content: String,
    /// Content kind (defaults to text)
    #[serde(default)]
    pub kind: MessageKind,
    /// Existing chat to attach to; resolved by participant pair when absent
    #[serde(default)]
    pub chat_id: Option<ChatId>,
}

/// Edit an existing message (sender only, within the edit window)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessage {
    pub message_id: MessageId,
    pub content: String,
}

/// Soft-delete a message (either participant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub message_id: MessageId,
}

/// Mark a received message as read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub chat_id: ChatId,
}

/// Change own availability status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub status: UserStatus,
}

/// Typing indicator toward another user (datagram, lossy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Typing {
    pub to: UserId,
    pub is_typing: bool,
}

/// Ping message for keepalive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for RTT measurement)
    pub timestamp: u64,
}

/// Pong response to Ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    /// Echo back the timestamp from Ping
    pub timestamp: u64,
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Condensed user record carried in events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: u64,
}

/// Successful handshake response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticated {
    pub user: UserSummary,
}

/// A message delivered live to its recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub message_id: MessageId,
    pub sender: UserId,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: u64,
    pub chat_id: ChatId,
}

/// Send confirmation back to the sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSent {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub timestamp: u64,
}

/// Message edit notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEdited {
    pub message_id: MessageId,
    pub content: String,
    pub edited_at: u64,
}

/// Message deletion notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub message_id: MessageId,
    pub deleted_at: u64,
}

/// Read-receipt notification toward the original sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRead {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub reader_id: UserId,
    pub read_at: u64,
}

/// User came online
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOnline {
    pub user_id: UserId,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: u64,
}

/// User went offline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOffline {
    pub user_id: UserId,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: u64,
}

/// User changed availability status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusChanged {
    pub user_id: UserId,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: u64,
}

/// Typing indicator relayed to the recipient (datagram, lossy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStatus {
    pub from: UserId,
    pub from_name: String,
    pub is_typing: bool,
    pub timestamp: u64,
}

/// Error response to the originating connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// Stable machine-readable code
    pub code: u32,
    /// Human-readable error message
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_send_message() {
        let msg = SendMessage {
            to: "user-b".to_string(),
            content: "Hello, World!".to_string(),
            kind: MessageKind::Text,
            chat_id: None,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: SendMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.to, decoded.to);
        assert_eq!(msg.content, decoded.content);
        assert_eq!(decoded.kind, MessageKind::Text);
        assert!(decoded.chat_id.is_none());
    }

    #[test]
    fn test_send_message_defaults() {
        // kind and chat_id are optional on the wire
        let decoded: SendMessage =
            serde_json::from_str(r#"{"to":"user-b","content":"hi"}"#).unwrap();
        assert_eq!(decoded.kind, MessageKind::Text);
        assert!(decoded.chat_id.is_none());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&UserStatus::Away).unwrap();
        assert_eq!(json, r#""away""#);

        let status: UserStatus = serde_json::from_str(r#""busy""#).unwrap();
        assert_eq!(status, UserStatus::Busy);

        assert!(serde_json::from_str::<UserStatus>(r#""invisible""#).is_err());
    }

    #[test]
    fn test_serialize_new_message() {
        let msg = NewMessage {
            message_id: "m1".to_string(),
            sender: "user-a".to_string(),
            sender_name: "alice".to_string(),
            content: "Test message".to_string(),
            kind: MessageKind::Text,
            timestamp: 1234567890,
            chat_id: "c1".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: NewMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.message_id, decoded.message_id);
        assert_eq!(msg.sender_name, decoded.sender_name);
        assert_eq!(msg.chat_id, decoded.chat_id);
    }
}
