//! Control packets every connection understands.
//!
//! - `HandshakePacket` (-1): protocol version exchange
//! - `ClosePacket` (-2): orderly shutdown with a message
//! - `KeepAlivePacket` (-3): idle connection probe
//!
//! They are registered on every connection and are routed to the internal
//! control listener before (optionally) reaching the application.

mod close;
mod handshake;
mod keep_alive;

pub use close::{ClosePacket, DEFAULT_CLOSE_MESSAGE};
pub use handshake::{HandshakeKind, HandshakePacket};
pub use keep_alive::KeepAlivePacket;

use crate::packet::PacketId;

pub const HANDSHAKE_ID: PacketId = -1;
pub const CLOSE_ID: PacketId = -2;
pub const KEEP_ALIVE_ID: PacketId = -3;

/// Whether `id` belongs to one of the control packets.
pub fn is_control(id: PacketId) -> bool {
    matches!(id, HANDSHAKE_ID | CLOSE_ID | KEEP_ALIVE_ID)
}

/// Whether `id` is in the range reserved for control packets.
pub fn is_reserved(id: PacketId) -> bool {
    id < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids() {
        assert!(is_control(-1));
        assert!(is_control(-2));
        assert!(is_control(-3));
        assert!(!is_control(-4));
        assert!(!is_control(0));
    }

    #[test]
    fn test_reserved_range() {
        assert!(is_reserved(i16::MIN));
        assert!(is_reserved(-1));
        assert!(!is_reserved(0));
        assert!(!is_reserved(i16::MAX));
    }
}
