//! Error types for the framing engine.

use crate::packet::PacketId;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Connection-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer sent a frame that cannot be valid (bad length).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A critical packet could not be decoded.
    #[error("parsing packet with id {id} failed: {source}")]
    Decode {
        id: PacketId,
        #[source]
        source: DecodeError,
    },

    /// An outbound packet could not be encoded.
    #[error("encoding packet with id {id} failed: {source}")]
    Encode {
        id: PacketId,
        #[source]
        source: EncodeError,
    },

    /// Transport read or write failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The connection is closing or closed.
    #[error("connection is closed")]
    Closed,

    /// Another task already drains the shared processing queue.
    #[error("external packet processing is already claimed")]
    AlreadyClaimed,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Connection loops need a Tokio runtime to be spawned on.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}

impl Error {
    /// Whether this error means the peer simply went away.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Errors raised while a packet reads its payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("needed {needed} bytes but only {remaining} remain")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Errors raised while a packet writes its payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("string of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    #[error("frame of {0} bytes does not fit a 32-bit length prefix")]
    FrameTooLarge(usize),
}

/// Errors raised when adding a packet type to a registry.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("factory for {name} declared id {declared} but produced id {actual}")]
    IdMismatch {
        name: &'static str,
        declared: PacketId,
        actual: PacketId,
    },

    #[error("packet id {0} is reserved for control packets")]
    Reserved(PacketId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_stream_classification() {
        let eof = Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(eof.is_end_of_stream());

        let reset = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(!reset.is_end_of_stream());

        assert!(!Error::ProtocolViolation("length 0".to_string()).is_end_of_stream());
    }

    #[test]
    fn test_decode_error_display() {
        let err = Error::Decode {
            id: -1,
            source: DecodeError::UnexpectedEnd {
                needed: 4,
                remaining: 1,
            },
        };
        assert_eq!(
            err.to_string(),
            "parsing packet with id -1 failed: needed 4 bytes but only 1 remain"
        );
    }
}
