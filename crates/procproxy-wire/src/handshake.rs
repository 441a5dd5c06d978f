//! The fixed 146-byte connection prologue.
//!
//! Layout: 18 ASCII bytes `"ProcessProxy 0001 "` (trailing space included)
//! followed by a 128-byte token field. The token is copied verbatim,
//! truncated to 128 bytes and right-padded with zero bytes; an absent token
//! leaves the whole field zero. The observed token is the prefix of the
//! field up to (but not including) the first zero byte, or all 128 bytes if
//! none occurs.

use crate::error::{Result, WireError};

/// Protocol identification prefix, sent verbatim at the head of the block.
pub const PROTOCOL_PREFIX: &[u8] = b"ProcessProxy 0001 ";

/// Size of the token field in bytes.
pub const TOKEN_FIELD_LEN: usize = 128;

/// Total handshake block size: prefix + token field.
pub const HANDSHAKE_LEN: usize = 146;

/// Build a handshake block from raw token material.
///
/// Tokens longer than the field are truncated; shorter ones are zero-padded.
pub fn encode_handshake(token: &[u8]) -> [u8; HANDSHAKE_LEN] {
    let mut block = [0u8; HANDSHAKE_LEN];
    block[..PROTOCOL_PREFIX.len()].copy_from_slice(PROTOCOL_PREFIX);
    let take = token.len().min(TOKEN_FIELD_LEN);
    block[PROTOCOL_PREFIX.len()..PROTOCOL_PREFIX.len() + take].copy_from_slice(&token[..take]);
    block
}

/// Validate a complete handshake block and extract the token.
pub fn parse_handshake(block: &[u8]) -> Result<String> {
    if block.len() != HANDSHAKE_LEN {
        return Err(WireError::MalformedHandshake("wrong block length"));
    }
    if &block[..PROTOCOL_PREFIX.len()] != PROTOCOL_PREFIX {
        return Err(WireError::MalformedHandshake("bad protocol prefix"));
    }
    let field = &block[PROTOCOL_PREFIX.len()..];
    let end = field
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(TOKEN_FIELD_LEN);
    let token = std::str::from_utf8(&field[..end])?;
    Ok(token.to_string())
}
