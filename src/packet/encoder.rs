//! Append-only packet writer.

use crate::error::EncodeError;
use crate::packet::PacketId;
use bytes::{BufMut, Bytes, BytesMut};

/// Initial capacity; most control and chat packets fit.
const INITIAL_CAPACITY: usize = 64;

/// Byte writer handed to [`Packet::encode`](crate::packet::Packet::encode).
///
/// All integers are big-endian. Strings are a `u16` byte length followed
/// by UTF-8 bytes.
#[derive(Debug)]
pub struct PacketEncoder {
    buf: BytesMut,
}

impl PacketEncoder {
    /// Create an encoder whose buffer starts with the packet id.
    pub fn new(id: PacketId) -> Self {
        let mut buf = BytesMut::with_capacity(INITIAL_CAPACITY);
        buf.put_i16(id);
        Self { buf }
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    /// Write raw bytes with no length prefix.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, v: &str) -> Result<(), EncodeError> {
        let len = u16::try_from(v.len()).map_err(|_| EncodeError::StringTooLong(v.len()))?;
        self.buf.put_u16(len);
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }

    /// Bytes written so far, including the id.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false: the id is written on construction.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and return id + payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
