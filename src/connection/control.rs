use super::Connection;
use crate::error::Error;
use crate::packet::{Packet, PacketId};
use crate::packets::{ClosePacket, HandshakeKind, HandshakePacket, KeepAlivePacket};
use tracing::{debug, trace};

/// Built-in handling of Handshake, Close and KeepAlive packets.
///
/// Runs before the application listener for every event.
pub(super) struct ControlListener;

impl ControlListener {
    pub(super) async fn packet_received(&self, connection: &Connection, packet: &dyn Packet) {
        if let Some(handshake) = packet.downcast_ref::<HandshakePacket>() {
            self.handshake(connection, handshake);
        } else if let Some(close) = packet.downcast_ref::<ClosePacket>() {
            if !connection.is_closed() {
                connection.on_connection_closed(&close.message, true).await;
            }
        } else if let Some(keep_alive) = packet.downcast_ref::<KeepAlivePacket>() {
            if keep_alive.is_response() {
                trace!(connection = %connection.name(), "Keep-alive answered");
            } else if let Err(e) = connection.send(KeepAlivePacket::response()) {
                debug!(connection = %connection.name(), error = %e, "Could not answer keep-alive");
            }
        }
    }

    fn handshake(&self, connection: &Connection, packet: &HandshakePacket) {
        if packet.kind == HandshakeKind::Request {
            if let Err(e) = connection.send_handshake_as(HandshakeKind::Response) {
                debug!(connection = %connection.name(), error = %e, "Could not answer handshake");
            }
        }
        connection.set_remote_version(packet.protocol_version);
        debug!(
            connection = %connection.name(),
            kind = ?packet.kind,
            remote_version = packet.protocol_version,
            approved = connection.is_version_approved(),
            "Handshake received"
        );
    }

    pub(super) fn connection_failed(&self, connection: &Connection, error: &Error) {
        trace!(connection = %connection.name(), error = %error, "Failure reported");
    }

    pub(super) fn connection_closed(&self, connection: &Connection, message: &str, expected: bool) {
        trace!(connection = %connection.name(), reason = message, expected, "Closure reported");
    }

    pub(super) fn unknown_packet_received(&self, connection: &Connection, id: PacketId) {
        debug!(connection = %connection.name(), id, "Unknown packet id");
    }
}
