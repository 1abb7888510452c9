use crate::error::{DecodeError, EncodeError};
use crate::packet::{Packet, PacketDecoder, PacketEncoder, PacketId, PacketType};
use crate::packets::CLOSE_ID;

/// Message carried by a `ClosePacket` unless one is set.
pub const DEFAULT_CLOSE_MESSAGE: &str = "Connection closed by remote partner";

/// Announces that the sender is closing the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePacket {
    pub message: String,
}

impl ClosePacket {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for ClosePacket {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSE_MESSAGE)
    }
}

impl Packet for ClosePacket {
    fn id(&self) -> PacketId {
        CLOSE_ID
    }

    fn decode(&mut self, buf: &mut PacketDecoder) -> Result<(), DecodeError> {
        self.message = buf.read_str()?;
        Ok(())
    }

    fn encode(&self, buf: &mut PacketEncoder) -> Result<(), EncodeError> {
        buf.write_str(&self.message)
    }
}

impl PacketType for ClosePacket {
    const ID: PacketId = CLOSE_ID;
}
