use procproxy_wire::WireError;

/// Errors surfaced by the controller side of the channel.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Transport or framing failure on the socket.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Failed to bind the loopback listener.
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The 146-byte prologue was missing, late, malformed, or rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The endpoint answered with a nonzero status; carries its message.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// The peer sent something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The socket closed before or during the operation.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection was already closed, or an exit was already sent.
    #[error("connection already closed")]
    AlreadyClosed,

    /// No prebuilt endpoint binary exists for this platform pair.
    #[error("unsupported target {os}-{arch}")]
    UnsupportedTarget { os: String, arch: String },

    /// Resolving the endpoint binary path failed.
    #[error("failed to resolve binary path: {0}")]
    Resolve(std::io::Error),
}

impl From<ProxyError> for std::io::Error {
    fn from(err: ProxyError) -> Self {
        let kind = match &err {
            ProxyError::ConnectionClosed | ProxyError::AlreadyClosed => {
                std::io::ErrorKind::NotConnected
            }
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
