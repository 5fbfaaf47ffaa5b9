//! Byte-level reader and writer for the wire format.
//!
//! Little-endian integers, u16-length-prefixed UTF-8 strings, raw 16-byte UUIDs.

use crate::error::CodecError;
use uuid::Uuid;

/// Appends wire-format fields to a growable byte buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_uuid(&mut self, value: &Uuid) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Writes a u16 length prefix followed by the UTF-8 bytes.
    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(CodecError::StringTooLong(bytes.len()));
        }
        self.write_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

/// Reads wire-format fields from a borrowed byte buffer.
///
/// Every read checks the remaining length first and fails with
/// [`CodecError::UnexpectedEof`] on a short buffer, so a truncated message can
/// never decode into a partially-populated value.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                needed: len - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CodecError> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut writer = WireWriter::new();
        writer.write_u8(7);
        writer.write_bool(true);
        writer.write_u16(0xBEEF);
        writer.write_u32(0xDEADBEEF);
        writer.write_f64(4.25);
        let id = Uuid::new_v4();
        writer.write_uuid(&id);
        writer.write_str("mossy cobble").unwrap();

        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u16().unwrap(), 0xBEEF);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_f64().unwrap(), 4.25);
        assert_eq!(reader.read_uuid().unwrap(), id);
        assert_eq!(reader.read_string().unwrap(), "mossy cobble");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn short_buffer_fails_fast() {
        let mut writer = WireWriter::new();
        writer.write_u16(500);
        let bytes = writer.into_bytes();

        // Length prefix promises 500 bytes that are not there.
        let mut reader = WireReader::new(&bytes);
        let err = reader.read_string().unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { .. }));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut writer = WireWriter::new();
        writer.write_u16(2);
        writer.write_u8(0xFF);
        writer.write_u8(0xFE);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert!(matches!(
            reader.read_string().unwrap_err(),
            CodecError::InvalidUtf8
        ));
    }
}
