//! Error handling for the chat backend

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat backend error types
///
/// Domain errors carry the stable wire codes reported back to the
/// originating connection; transport and codec errors stay server-side.
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Bad, missing or expired credential
    Auth(String),
    /// Account exists but is deactivated
    AccountDeactivated,
    /// Sender and recipient are the same identity
    SelfMessage,
    /// Recipient does not resolve to an existing, active user
    RecipientNotFound(String),
    /// Chat does not exist or the requester is not a participant
    ChatNotFoundOrForbidden(String),
    /// Edit attempted after the edit window elapsed
    EditWindowExpired(String),
    /// Entity missing or requester lacks access to it
    NotFoundOrForbidden(String),
    /// Durable-store call failed or timed out
    PersistenceFailure(String),
    /// Malformed or out-of-bounds payload
    InvalidMessage(String),
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Protocol errors (unexpected frame, bad state)
    Protocol(String),
    /// Connection errors
    Connection(String),
    /// Configuration error
    Config(String),
}

impl ChatError {
    /// Get the stable machine-readable code for this error
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Network(_) => 1000,
            ChatError::Serialization(_) => 1001,
            ChatError::Auth(_) => 1002,
            ChatError::Protocol(_) => 1003,
            ChatError::Connection(_) => 1004,
            ChatError::InvalidMessage(_) => 1005,
            ChatError::Config(_) => 1006,
            ChatError::AccountDeactivated => 1010,
            ChatError::SelfMessage => 1011,
            ChatError::RecipientNotFound(_) => 1012,
            ChatError::ChatNotFoundOrForbidden(_) => 1013,
            ChatError::EditWindowExpired(_) => 1014,
            ChatError::NotFoundOrForbidden(_) => 1015,
            ChatError::PersistenceFailure(_) => 1016,
        }
    }

    /// Create an authentication error
    pub fn auth<T: Into<String>>(msg: T) -> Self {
        ChatError::Auth(msg.into())
    }

    /// Create a recipient-not-found error
    pub fn recipient_not_found<T: Into<String>>(user_id: T) -> Self {
        ChatError::RecipientNotFound(user_id.into())
    }

    /// Create a chat-not-found-or-forbidden error
    pub fn chat_forbidden<T: Into<String>>(chat_id: T) -> Self {
        ChatError::ChatNotFoundOrForbidden(chat_id.into())
    }

    /// Create a not-found-or-forbidden error
    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        ChatError::NotFoundOrForbidden(msg.into())
    }

    /// Create a persistence-failure error
    pub fn persistence<T: Into<String>>(msg: T) -> Self {
        ChatError::PersistenceFailure(msg.into())
    }

    /// Create an invalid-message error
    pub fn invalid_message<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidMessage(msg.into())
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        ChatError::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            ChatError::AccountDeactivated => write!(f, "Account is deactivated"),
            ChatError::SelfMessage => write!(f, "Cannot send a message to yourself"),
            ChatError::RecipientNotFound(id) => write!(f, "Recipient not found: {}", id),
            ChatError::ChatNotFoundOrForbidden(id) => {
                write!(f, "Chat not found or not a participant: {}", id)
            }
            ChatError::EditWindowExpired(id) => {
                write!(f, "Edit window expired for message {}", id)
            }
            ChatError::NotFoundOrForbidden(msg) => write!(f, "Not found or forbidden: {}", msg),
            ChatError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
            ChatError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<quinn::ConnectionError> for ChatError {
    fn from(err: quinn::ConnectionError) -> Self {
        ChatError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for ChatError {
    fn from(err: quinn::ReadError) -> Self {
        ChatError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for ChatError {
    fn from(err: quinn::WriteError) -> Self {
        ChatError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Protocol(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_codes_are_stable() {
        assert_eq!(ChatError::SelfMessage.code(), 1011);
        assert_eq!(ChatError::recipient_not_found("u1").code(), 1012);
        assert_eq!(ChatError::chat_forbidden("c1").code(), 1013);
        assert_eq!(ChatError::persistence("down").code(), 1016);
    }

    #[test]
    fn test_display_carries_context() {
        let err = ChatError::recipient_not_found("user-42");
        assert!(err.to_string().contains("user-42"));
    }
}
