//! Packet payload reader and builder.
//!
//! A packet is a varint packet ID followed by a typed payload. The
//! [`PacketReader`] walks a received payload with a cursor; the
//! [`PacketWriter`] accumulates typed writes and produces the finished
//! payload bytes. Framing (length prefix, compression) is the job of
//! [`crate::framing`].

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::varint::{read_varint, read_varlong, write_varint, write_varlong};

/// Sequential typed reader over a packet's bytes.
///
/// The packet ID is decoded eagerly on construction; all other fields are
/// consumed in order by the `read_*` methods.
#[derive(Debug, Clone)]
pub struct PacketReader {
    /// The packet ID.
    pub id: i32,
    buf: Bytes,
}

impl PacketReader {
    /// Decode the leading packet-ID varint and position the cursor after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer does not start with a valid varint.
    pub fn new(buffer: Bytes) -> Result<Self> {
        let mut buf = buffer;
        let id = read_varint(&mut buf)?;
        Ok(Self { id, buf })
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::BufferUnderrun {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a `VarInt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the varint is malformed or the buffer ends.
    pub fn read_varint(&mut self) -> Result<i32> {
        read_varint(&mut self.buf)
    }

    /// Read a `VarLong`.
    ///
    /// # Errors
    ///
    /// Returns an error if the varlong is malformed or the buffer ends.
    pub fn read_varlong(&mut self) -> Result<i64> {
        read_varlong(&mut self.buf)
    }

    /// Read a single byte as a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read an unsigned byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a signed byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    /// Read a big-endian unsigned 16-bit integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let value = BigEndian::read_u16(&self.buf[..2]);
        self.buf.advance(2);
        Ok(value)
    }

    /// Read a big-endian signed 16-bit integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        let value = BigEndian::read_i16(&self.buf[..2]);
        self.buf.advance(2);
        Ok(value)
    }

    /// Read a big-endian unsigned 64-bit integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let value = BigEndian::read_u64(&self.buf[..8]);
        self.buf.advance(8);
        Ok(value)
    }

    /// Read a big-endian signed 64-bit integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer ends.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        let value = BigEndian::read_i64(&self.buf[..8]);
        self.buf.advance(8);
        Ok(value)
    }

    /// Read exactly `len` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    /// Read a varint-length-prefixed byte array.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is malformed or the buffer ends.
    pub fn read_byte_array(&mut self) -> Result<Bytes> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::MalformedPayload(format!("negative length {len}")))?;
        self.read_bytes(len)
    }

    /// Read a varint-length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the bytes are not
    /// valid UTF-8.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_byte_array()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }

    /// Read a string field and parse it as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the contents are not
    /// valid JSON.
    pub fn read_json(&mut self) -> Result<serde_json::Value> {
        let text = self.read_string()?;
        serde_json::from_str(&text).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }

    /// The number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Consume and return all unread bytes.
    pub fn read_remaining(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }
}

/// Growable builder for a packet payload.
///
/// The packet-ID varint is always the first write; every other append is
/// chained and [`PacketWriter::encode`] yields the finished bytes.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    /// Start a packet with the given ID.
    #[must_use]
    pub fn new(id: i32) -> Self {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, id);
        Self { buf }
    }

    /// Append a `VarInt`.
    #[must_use]
    pub fn write_varint(mut self, value: i32) -> Self {
        write_varint(&mut self.buf, value);
        self
    }

    /// Append a `VarLong`.
    #[must_use]
    pub fn write_varlong(mut self, value: i64) -> Self {
        write_varlong(&mut self.buf, value);
        self
    }

    /// Append a boolean as a single byte.
    #[must_use]
    pub fn write_bool(mut self, value: bool) -> Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    /// Append an unsigned byte.
    #[must_use]
    pub fn write_u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a big-endian unsigned 16-bit integer.
    #[must_use]
    pub fn write_u16(mut self, value: u16) -> Self {
        self.buf.put_u16(value);
        self
    }

    /// Append a big-endian signed 16-bit integer.
    #[must_use]
    pub fn write_i16(mut self, value: i16) -> Self {
        self.buf.put_i16(value);
        self
    }

    /// Append a big-endian unsigned 64-bit integer.
    #[must_use]
    pub fn write_u64(mut self, value: u64) -> Self {
        self.buf.put_u64(value);
        self
    }

    /// Append a big-endian signed 64-bit integer.
    #[must_use]
    pub fn write_i64(mut self, value: i64) -> Self {
        self.buf.put_i64(value);
        self
    }

    /// Append raw bytes with no length prefix.
    #[must_use]
    pub fn write_bytes(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append a varint-length-prefixed byte array.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn write_byte_array(mut self, bytes: &[u8]) -> Self {
        write_varint(&mut self.buf, bytes.len() as i32);
        self.buf.put_slice(bytes);
        self
    }

    /// Append a varint-length-prefixed UTF-8 string.
    #[must_use]
    pub fn write_string(self, value: &str) -> Self {
        self.write_byte_array(value.as_bytes())
    }

    /// Append a JSON value as a string field.
    #[must_use]
    pub fn write_json(self, value: &serde_json::Value) -> Self {
        self.write_string(&value.to_string())
    }

    /// Finish the packet, yielding ID varint plus payload.
    #[must_use]
    pub fn encode(self) -> Bytes {
        self.buf.freeze()
    }
}

impl From<PacketWriter> for Bytes {
    fn from(writer: PacketWriter) -> Self {
        writer.encode()
    }
}
