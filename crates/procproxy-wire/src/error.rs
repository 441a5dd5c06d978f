/// Errors that can occur while encoding or decoding the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// An I/O error occurred on the underlying stream.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete field was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A length-prefixed field exceeds the configured maximum.
    #[error("field too large ({size} bytes, max {max})")]
    FieldTooLarge { size: usize, max: usize },

    /// A wire string was not valid UTF-8.
    #[error("invalid UTF-8 in wire string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The 146-byte handshake block failed validation.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(&'static str),
}

pub type Result<T> = std::result::Result<T, WireError>;
