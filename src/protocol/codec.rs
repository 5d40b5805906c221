//! Codec for encoding/decoding protocol events to/from frames
//!
//! This module provides the bridge between typed events and binary frames.

use super::events::*;
use super::frame::{Frame, FrameType};
use bytes::Bytes;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for events that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this event
    fn frame_type(&self) -> FrameType;

    /// Encode the event payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for events that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this event
    fn expected_frame_type() -> FrameType;

    /// Decode the event from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Helper macro to implement Encodable and Decodable for an event type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                serde_json::to_vec(self)
                    .map(Bytes::from)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

// Control messages
impl_codec!(Authenticate, FrameType::Authenticate);
impl_codec!(Ping, FrameType::Ping);
impl_codec!(Pong, FrameType::Pong);

// Client commands
impl_codec!(SendMessage, FrameType::SendMessage);
impl_codec!(EditMessage, FrameType::EditMessage);
impl_codec!(DeleteMessage, FrameType::DeleteMessage);
impl_codec!(JoinChat, FrameType::JoinChat);
impl_codec!(UpdateStatus, FrameType::UpdateStatus);
impl_codec!(ReadReceipt, FrameType::ReadReceipt);

// Server events
impl_codec!(Authenticated, FrameType::Authenticated);
impl_codec!(NewMessage, FrameType::NewMessage);
impl_codec!(MessageSent, FrameType::MessageSent);
impl_codec!(MessageEdited, FrameType::MessageEdited);
impl_codec!(MessageDeleted, FrameType::MessageDeleted);
impl_codec!(MessageRead, FrameType::MessageRead);

// Ephemeral signals
impl_codec!(Typing, FrameType::Typing);
impl_codec!(TypingStatus, FrameType::TypingStatus);
impl_codec!(UserOnline, FrameType::UserOnline);
impl_codec!(UserOffline, FrameType::UserOffline);
impl_codec!(UserStatusChanged, FrameType::UserStatusChanged);

// Error
impl_codec!(Error, FrameType::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let auth = Authenticate {
            token: "secret-token".to_string(),
        };

        let frame = auth.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Authenticate);

        let decoded = Authenticate::decode_frame(&frame).unwrap();
        assert_eq!(decoded.token, auth.token);
    }

    #[test]
    fn test_decode_wrong_frame_type() {
        let ping = Ping { timestamp: 42 };
        let frame = ping.encode_frame().unwrap();

        // Decoding a Ping frame as Pong must fail at the boundary
        assert!(Pong::decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_malformed_payload() {
        let frame = Frame::new(FrameType::SendMessage, r#"{"to": 12}"#);
        assert!(SendMessage::decode_frame(&frame).is_err());
    }
}
