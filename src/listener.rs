//! Application callbacks.

use crate::connection::Connection;
use crate::error::Error;
use crate::packet::{Packet, PacketId};

/// Receives protocol events for a connection.
///
/// Every hook has a no-op default. Hooks run on the connection's inbound
/// task (inline delivery) or on whichever task drains the processing queue
/// (deferred delivery), so they should not block.
pub trait PacketListener: Send + Sync {
    /// A packet was received and decoded.
    fn packet_received(&self, _connection: &Connection, _packet: &dyn Packet) {}

    /// The connection failed. Fires at most once, before `connection_closed`.
    fn connection_failed(&self, _connection: &Connection, _error: &Error) {}

    /// The connection closed. Fires at most once.
    fn connection_closed(&self, _connection: &Connection, _message: &str, _expected: bool) {}

    /// A frame carried an id with no registered packet type.
    fn unknown_packet_received(&self, _connection: &Connection, _id: PacketId) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl PacketListener for NoopListener {}
