//! Packet capability and its wire helpers.
//!
//! A packet is one typed message carried in one frame:
//!
//! ```text
//! +----------------+----------------+---------------------+
//! | length: i32 BE | id: i16 BE     | payload             |
//! +----------------+----------------+---------------------+
//!                  |<------------- length bytes --------->|
//! ```
//!
//! Negative ids are reserved for the control packets in [`crate::packets`];
//! applications use ids `>= 0`.

mod decoder;
mod encoder;
mod registry;

pub use decoder::PacketDecoder;
pub use encoder::PacketEncoder;
pub use registry::{PacketFactory, Registry};

use crate::error::{DecodeError, EncodeError};
use std::any::Any;
use std::fmt;

/// Numeric packet identifier carried in every frame.
pub type PacketId = i16;

/// A message that can travel over a connection.
///
/// Instances are single-use: one is either filled by exactly one
/// [`decode`](Packet::decode) or written by exactly one
/// [`encode`](Packet::encode).
pub trait Packet: Any + Send + Sync + fmt::Debug + 'static {
    /// Wire id of this packet type. Must be constant per type.
    fn id(&self) -> PacketId;

    /// Fill this packet from a payload bounded to its frame.
    fn decode(&mut self, buf: &mut PacketDecoder) -> Result<(), DecodeError>;

    /// Write the payload (the id is already written).
    fn encode(&self, buf: &mut PacketEncoder) -> Result<(), EncodeError>;

    /// A decode failure of a critical packet fails the connection; other
    /// packets are skipped.
    fn is_critical(&self) -> bool {
        false
    }
}

/// A packet type that can be registered by type.
pub trait PacketType: Packet + Default {
    /// Wire id of the type, equal to what [`Packet::id`] returns.
    const ID: PacketId;
}

impl dyn Packet {
    /// Returns true if the packet is of type `T`.
    pub fn is<T: Packet>(&self) -> bool {
        (self as &dyn Any).is::<T>()
    }

    /// Downcast to a concrete packet type.
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}
