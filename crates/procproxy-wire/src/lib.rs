//! Wire protocol for the process-proxy control channel.
//!
//! Every exchange on the channel is a single-byte opcode followed by a
//! command-specific payload, answered by a response envelope:
//! - a leading `i32` status (`0` = success),
//! - on success, the command-specific body,
//! - on failure, one length-prefixed UTF-8 error message and nothing else.
//!
//! All multi-byte integers are little-endian. Strings are UTF-8 with a
//! `u32` byte-count prefix and no terminator. There is no checksum and no
//! delimiter; length fields govern extent.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod op;
pub mod reader;
pub mod writer;

pub use codec::{put_error, put_lp_bytes, put_lp_str, put_status_ok, MAX_FIELD_LEN};
pub use error::{Result, WireError};
pub use handshake::{
    encode_handshake, parse_handshake, HANDSHAKE_LEN, PROTOCOL_PREFIX, TOKEN_FIELD_LEN,
};
pub use op::{Opcode, READ_CLOSED, READ_NO_DATA, STATUS_ERROR, STATUS_OK};
pub use reader::WireReader;
pub use writer::WireWriter;
