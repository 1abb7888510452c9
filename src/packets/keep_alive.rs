use crate::error::{DecodeError, EncodeError};
use crate::packet::{Packet, PacketDecoder, PacketEncoder, PacketId, PacketType};
use crate::packets::KEEP_ALIVE_ID;

/// Idle probe. A request is answered with a response; a response is not
/// answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAlivePacket {
    response: bool,
}

impl KeepAlivePacket {
    pub fn request() -> Self {
        Self { response: false }
    }

    pub fn response() -> Self {
        Self { response: true }
    }

    pub fn is_response(&self) -> bool {
        self.response
    }
}

impl Packet for KeepAlivePacket {
    fn id(&self) -> PacketId {
        KEEP_ALIVE_ID
    }

    fn decode(&mut self, buf: &mut PacketDecoder) -> Result<(), DecodeError> {
        self.response = buf.read_bool()?;
        Ok(())
    }

    fn encode(&self, buf: &mut PacketEncoder) -> Result<(), EncodeError> {
        buf.write_bool(self.response);
        Ok(())
    }
}

impl PacketType for KeepAlivePacket {
    const ID: PacketId = KEEP_ALIVE_ID;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for packet in [KeepAlivePacket::request(), KeepAlivePacket::response()] {
            let mut encoder = PacketEncoder::new(packet.id());
            packet.encode(&mut encoder).unwrap();
            let bytes = encoder.finish();
            assert_eq!(bytes.len(), 3);

            let mut decoder = PacketDecoder::new(bytes);
            decoder.read_i16().unwrap();
            let mut decoded = KeepAlivePacket::default();
            decoded.decode(&mut decoder).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_empty_payload_fails() {
        let mut decoder = PacketDecoder::new(bytes::Bytes::new());
        let mut packet = KeepAlivePacket::default();
        assert!(packet.decode(&mut decoder).is_err());
        assert!(!packet.is_critical());
    }
}
