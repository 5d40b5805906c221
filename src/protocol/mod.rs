//! Wire protocol: framing, codec and typed event payloads

pub mod codec;
pub mod events;
pub mod frame;

pub use codec::{Decodable, Encodable};
pub use frame::{Frame, FrameCodec, FrameType};
