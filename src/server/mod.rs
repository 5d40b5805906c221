//! Server side of the chat backend
//!
//! ## Components
//!
//! - **Presence registry**: identity -> live connection, newest wins
//! - **Connection gateway**: handshake, frame dispatch, state machine
//! - **Message fan-out**: persist first, then confirm and deliver
//! - **Signal router**: typing indicators, lossy by design
//! - **Presence broadcaster**: online/offline/status fan-out + store mirror

pub mod broadcast;
pub mod chat_server;
pub mod connection;
pub mod fanout;
pub mod presence;
pub mod rooms;
pub mod signals;

pub use broadcast::PresenceBroadcaster;
pub use chat_server::{ChatServer, ServerConfig, ServerStats};
pub use connection::{ConnectionHandler, Delivery, GatewayEvent};
pub use fanout::MessageFanout;
pub use presence::{ConnectionHandle, PresenceEntry, PresenceRegistry};
pub use rooms::ChatRooms;
pub use signals::SignalRouter;
