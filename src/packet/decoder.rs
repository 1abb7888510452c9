//! Bounded packet reader.

use crate::error::DecodeError;
use bytes::{Buf, Bytes};

/// Read view over exactly one frame's payload.
///
/// Reads past the end fail with [`DecodeError::UnexpectedEnd`] instead of
/// touching the next frame.
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    buf: Bytes,
}

impl PacketDecoder {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::UnexpectedEnd {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Any non-zero byte reads as true.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    /// Read `len` raw bytes (zero-copy).
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Read the rest of the payload (zero-copy).
    pub fn read_remaining(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }

    /// Read a `u16`-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let raw = self.read_bytes(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketEncoder;

    #[test]
    fn test_primitives_in_order() {
        let mut encoder = PacketEncoder::new(1);
        encoder.write_bool(false);
        encoder.write_i8(i8::MIN);
        encoder.write_u16(u16::MAX);
        encoder.write_i32(i32::MIN);
        encoder.write_i64(i64::MAX);
        encoder.write_f64(-0.5);
        encoder.write_str("").unwrap();
        encoder.write_str("grüße").unwrap();

        let mut decoder = PacketDecoder::new(encoder.finish());
        assert_eq!(decoder.read_i16().unwrap(), 1);
        assert!(!decoder.read_bool().unwrap());
        assert_eq!(decoder.read_i8().unwrap(), i8::MIN);
        assert_eq!(decoder.read_u16().unwrap(), u16::MAX);
        assert_eq!(decoder.read_i32().unwrap(), i32::MIN);
        assert_eq!(decoder.read_i64().unwrap(), i64::MAX);
        assert_eq!(decoder.read_f64().unwrap(), -0.5);
        assert_eq!(decoder.read_str().unwrap(), "");
        assert_eq!(decoder.read_str().unwrap(), "grüße");
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_read_past_end() {
        let mut decoder = PacketDecoder::new(Bytes::from_static(&[0x00, 0x01, 0x02]));

        match decoder.read_i32() {
            Err(DecodeError::UnexpectedEnd { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // Failed read consumes nothing
        assert_eq!(decoder.remaining(), 3);
    }

    #[test]
    fn test_truncated_string() {
        // Declares 5 bytes, carries 2
        let mut decoder = PacketDecoder::new(Bytes::from_static(&[0x00, 0x05, b'a', b'b']));
        assert!(matches!(
            decoder.read_str(),
            Err(DecodeError::UnexpectedEnd { needed: 5, remaining: 2 })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut decoder = PacketDecoder::new(Bytes::from_static(&[0x00, 0x02, 0xC3, 0x28]));
        assert!(matches!(decoder.read_str(), Err(DecodeError::InvalidUtf8(_))));
    }

    #[test]
    fn test_read_remaining() {
        let mut decoder = PacketDecoder::new(Bytes::from_static(b"abcdef"));
        assert_eq!(&decoder.read_bytes(2).unwrap()[..], b"ab");
        assert_eq!(&decoder.read_remaining()[..], b"cdef");
        assert_eq!(decoder.remaining(), 0);
    }
}
