use crate::error::{DecodeError, EncodeError};
use crate::packet::{Packet, PacketDecoder, PacketEncoder, PacketId, PacketType};
use crate::packets::HANDSHAKE_ID;

/// Direction of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeKind {
    /// Asks the peer to answer with its own version.
    #[default]
    Request,
    /// Answer to a request; never answered again.
    Response,
}

impl HandshakeKind {
    fn to_wire(self) -> i32 {
        match self {
            HandshakeKind::Request => 0,
            HandshakeKind::Response => 1,
        }
    }

    fn from_wire(v: i32) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(HandshakeKind::Request),
            1 => Ok(HandshakeKind::Response),
            other => Err(DecodeError::InvalidValue(format!("handshake id {other}"))),
        }
    }
}

/// Protocol version exchange.
///
/// Payload: `handshake id: i32` then `protocol version: i32`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakePacket {
    pub kind: HandshakeKind,
    pub protocol_version: i32,
}

impl HandshakePacket {
    pub fn new(kind: HandshakeKind, protocol_version: i32) -> Self {
        Self {
            kind,
            protocol_version,
        }
    }
}

impl Packet for HandshakePacket {
    fn id(&self) -> PacketId {
        HANDSHAKE_ID
    }

    fn decode(&mut self, buf: &mut PacketDecoder) -> Result<(), DecodeError> {
        self.kind = HandshakeKind::from_wire(buf.read_i32()?)?;
        self.protocol_version = buf.read_i32()?;
        Ok(())
    }

    fn encode(&self, buf: &mut PacketEncoder) -> Result<(), EncodeError> {
        buf.write_i32(self.kind.to_wire());
        buf.write_i32(self.protocol_version);
        Ok(())
    }

    fn is_critical(&self) -> bool {
        true
    }
}

impl PacketType for HandshakePacket {
    const ID: PacketId = HANDSHAKE_ID;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: &HandshakePacket) -> HandshakePacket {
        let mut encoder = PacketEncoder::new(packet.id());
        packet.encode(&mut encoder).unwrap();

        let mut decoder = PacketDecoder::new(encoder.finish());
        assert_eq!(decoder.read_i16().unwrap(), HANDSHAKE_ID);
        let mut decoded = HandshakePacket::default();
        decoded.decode(&mut decoder).unwrap();
        assert_eq!(decoder.remaining(), 0);
        decoded
    }

    #[test]
    fn test_round_trip_boundaries() {
        for packet in [
            HandshakePacket::new(HandshakeKind::Request, 1),
            HandshakePacket::new(HandshakeKind::Response, i32::MAX),
            HandshakePacket::new(HandshakeKind::Request, i32::MIN),
            HandshakePacket::new(HandshakeKind::Response, 0),
        ] {
            assert_eq!(round_trip(&packet), packet);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut encoder = PacketEncoder::new(HANDSHAKE_ID);
        encoder.write_i32(2);
        encoder.write_i32(1);
        let mut decoder = PacketDecoder::new(encoder.finish());
        decoder.read_i16().unwrap();

        let mut packet = HandshakePacket::default();
        assert!(matches!(
            packet.decode(&mut decoder),
            Err(DecodeError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_is_critical() {
        assert!(HandshakePacket::default().is_critical());
    }
}
