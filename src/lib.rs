//! QUIC-based backend for one-to-one chat
//!
//! This library provides the real-time core of a pairwise chat service:
//! authenticated clients exchange persisted text messages and ephemeral
//! signals (typing, read receipts) while a presence registry tracks which
//! identities are currently reachable.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use error::{ChatError, Result};
pub use server::ChatServer;

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Maximum message content length in bytes, enforced on send and edit
pub const MAX_CONTENT_LEN: usize = 4096;

/// Window during which the sender may edit a message, measured from the
/// sent timestamp, in milliseconds
pub const EDIT_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Generate a unique entity ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
