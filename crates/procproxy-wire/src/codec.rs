//! Encoding helpers for command frames and response envelopes.
//!
//! Callers assemble a complete frame in a [`BytesMut`] and hand it to
//! [`crate::WireWriter::send`] so every frame reaches the stream as one
//! contiguous write.

use bytes::{BufMut, BytesMut};

use crate::op::{STATUS_ERROR, STATUS_OK};

/// Maximum accepted size for any single length-prefixed field (16 MiB).
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Append a `u32` byte count followed by the raw bytes.
pub fn put_lp_bytes(dst: &mut BytesMut, payload: &[u8]) {
    dst.reserve(4 + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
}

/// Append a length-prefixed UTF-8 string (no terminator).
pub fn put_lp_str(dst: &mut BytesMut, text: &str) {
    put_lp_bytes(dst, text.as_bytes());
}

/// Append a success status, to be followed by the command-specific body.
pub fn put_status_ok(dst: &mut BytesMut) {
    dst.put_i32_le(STATUS_OK);
}

/// Append a complete error envelope: nonzero status plus its message.
pub fn put_error(dst: &mut BytesMut, message: &str) {
    dst.put_i32_le(STATUS_ERROR);
    put_lp_str(dst, message);
}
