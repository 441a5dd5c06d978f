use std::io::{ErrorKind, Read};

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::MAX_FIELD_LEN;
use crate::error::{Result, WireError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads wire-protocol fields from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete fields.
pub struct WireReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read> WireReader<T> {
    /// Create a reader with an empty buffer.
    pub fn new(inner: T) -> Self {
        Self::with_leftover(inner, Bytes::new())
    }

    /// Create a reader whose buffer starts with bytes already consumed from
    /// the stream (e.g. surplus data received together with the handshake
    /// block). Those bytes are yielded before anything is read from `inner`.
    pub fn with_leftover(inner: T, leftover: Bytes) -> Self {
        let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.max(leftover.len()));
        buf.extend_from_slice(&leftover);
        Self { inner, buf }
    }

    fn fill_to(&mut self, wanted: usize) -> Result<()> {
        while self.buf.len() < wanted {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            };
            if read == 0 {
                return Err(WireError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.fill_to(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.fill_to(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.fill_to(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if len > MAX_FIELD_LEN {
            return Err(WireError::FieldTooLarge {
                size: len,
                max: MAX_FIELD_LEN,
            });
        }
        self.fill_to(len)?;
        Ok(self.buf.split_to(len).freeze())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let raw = self.read_bytes(len)?;
        let text = std::str::from_utf8(&raw)?;
        Ok(text.to_string())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{put_lp_bytes, put_lp_str};

    #[test]
    fn reads_integers_little_endian() {
        let wire = vec![0x07, 0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = WireReader::new(Cursor::new(wire));
        assert_eq!(reader.read_u8().unwrap(), 0x07);
        assert_eq!(reader.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(reader.read_i32().unwrap(), -1);
    }

    #[test]
    fn reads_length_prefixed_string() {
        let mut wire = BytesMut::new();
        put_lp_str(&mut wire, "héllo");
        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_string().unwrap(), "héllo");
    }

    #[test]
    fn string_roundtrip_64k() {
        let text = "√".repeat((1 << 16) / 3);
        let mut wire = BytesMut::new();
        put_lp_str(&mut wire, &text);
        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_string().unwrap(), text);
    }

    #[test]
    fn payload_bytes_may_contain_opcode_values() {
        // 0x07 inside a length-prefixed payload is data, not a command.
        let mut wire = BytesMut::new();
        put_lp_bytes(&mut wire, &[0x07, 0x01, 0x07]);
        wire.put_u8(0xAA);
        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        let len = reader.read_u32().unwrap() as usize;
        assert_eq!(reader.read_bytes(len).unwrap().as_ref(), &[0x07, 0x01, 0x07]);
        assert_eq!(reader.read_u8().unwrap(), 0xAA);
    }

    #[test]
    fn leftover_bytes_are_served_first() {
        let mut leftover = BytesMut::new();
        leftover.put_i32_le(0);
        leftover.put_u32_le(2);
        let mut reader = WireReader::with_leftover(
            Cursor::new(b"ok-and-more".to_vec()),
            leftover.freeze(),
        );
        assert_eq!(reader.read_i32().unwrap(), 0);
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_bytes(2).unwrap().as_ref(), b"ok");
    }

    #[test]
    fn partial_reads_are_assembled() {
        let mut wire = BytesMut::new();
        put_lp_str(&mut wire, "slow");
        let mut reader = WireReader::new(ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        });
        assert_eq!(reader.read_string().unwrap(), "slow");
    }

    #[test]
    fn eof_is_connection_closed() {
        let mut reader = WireReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(
            reader.read_u8(),
            Err(WireError::ConnectionClosed)
        ));
    }

    #[test]
    fn eof_mid_field_is_connection_closed() {
        let mut wire = BytesMut::new();
        wire.put_u32_le(16);
        wire.put_slice(b"short");
        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        let len = reader.read_u32().unwrap() as usize;
        assert!(matches!(
            reader.read_bytes(len),
            Err(WireError::ConnectionClosed)
        ));
    }

    #[test]
    fn oversized_field_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u32_le(u32::MAX);
        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        let len = reader.read_u32().unwrap() as usize;
        assert!(matches!(
            reader.read_bytes(len),
            Err(WireError::FieldTooLarge { .. })
        ));
    }

    #[test]
    fn invalid_utf8_string_rejected() {
        let mut wire = BytesMut::new();
        put_lp_bytes(&mut wire, &[0xFF, 0xFE]);
        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert!(matches!(
            reader.read_string(),
            Err(WireError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        put_lp_str(&mut wire, "ok");
        let mut reader = WireReader::new(InterruptedThenData {
            interrupted: false,
            bytes: wire.to_vec(),
            pos: 0,
        });
        assert_eq!(reader.read_string().unwrap(), "ok");
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
