//! Loopback acceptor.
//!
//! Listens on IPv4 localhost only. Each accepted socket must produce the
//! complete 146-byte prologue within the handshake deadline; the prefix is
//! verified, the token extracted and optionally run past a validator, and
//! only then is a [`ProxyConnection`] constructed. Failed attempts close the
//! socket silently — the consumer never hears about them. Bytes that arrive
//! in the same buffer beyond the prologue are handed to the connection as
//! the first bytes of its response stream.

use std::io::Read;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use procproxy_wire::{parse_handshake, HANDSHAKE_LEN};

use crate::connection::ProxyConnection;
use crate::error::{ProxyError, Result};

/// Predicate deciding whether a handshake token is acceptable.
pub type TokenValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Tunables for the acceptor and the connections it produces.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a new socket may take to deliver the full handshake block.
    pub handshake_timeout: Duration,
    /// Delay between READ_INPUT retries when the endpoint reports no data.
    pub poll_interval: Duration,
    /// Maximum bytes requested per READ_INPUT command.
    pub read_chunk: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            read_chunk: 8192,
        }
    }
}

/// Accepts endpoint connections on 127.0.0.1.
pub struct ProxyServer {
    listener: TcpListener,
    config: ServerConfig,
    validator: Option<TokenValidator>,
}

impl ProxyServer {
    /// Bind to a loopback port. Port `0` picks an ephemeral one; see
    /// [`ProxyServer::port`].
    pub fn bind(port: u16) -> Result<Self> {
        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, port)).map_err(ProxyError::Bind)?;
        Ok(Self {
            listener,
            config: ServerConfig::default(),
            validator: None,
        })
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    /// Override the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Attach a token validator. Connections whose token it rejects are
    /// dropped before the consumer ever sees them.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Override all connection tunables at once.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection that passes handshake validation
    /// (blocking). Sockets that fail are closed and skipped.
    pub fn accept(&self) -> Result<ProxyConnection> {
        loop {
            let (stream, addr) = self.listener.accept().map_err(ProxyError::Accept)?;
            match self.admit(stream) {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    tracing::debug!(%err, %addr, "connection rejected during handshake");
                }
            }
        }
    }

    /// Run the accept loop on its own thread, handing every validated
    /// connection to `consumer`. Stops when accepting itself fails (e.g. the
    /// process is shutting down).
    pub fn serve(self, mut consumer: impl FnMut(ProxyConnection) + Send + 'static) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.accept() {
                Ok(conn) => consumer(conn),
                Err(err) => {
                    tracing::warn!(%err, "accept loop stopped");
                    return;
                }
            }
        })
    }

    fn admit(&self, mut stream: TcpStream) -> Result<ProxyConnection> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN + 256);

        while buf.len() < HANDSHAKE_LEN {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
                .ok_or_else(|| ProxyError::Handshake("handshake deadline expired".into()))?;
            stream
                .set_read_timeout(Some(remaining))
                .map_err(|err| ProxyError::Handshake(err.to_string()))?;

            let mut chunk = [0u8; 512];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(ProxyError::Handshake(
                        "socket closed before handshake completed".into(),
                    ))
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(ProxyError::Handshake("handshake deadline expired".into()))
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ProxyError::Handshake(err.to_string())),
            }
        }

        let block = buf.split_to(HANDSHAKE_LEN);
        let token = parse_handshake(&block)
            .map_err(|err| ProxyError::Handshake(err.to_string()))?;

        if let Some(validator) = &self.validator {
            if !validator(&token) {
                return Err(ProxyError::Handshake("token rejected by policy".into()));
            }
        }

        stream
            .set_read_timeout(None)
            .map_err(|err| ProxyError::Handshake(err.to_string()))?;

        tracing::debug!(token_len = token.len(), "endpoint connection accepted");
        ProxyConnection::new(stream, token, buf.freeze(), &self.config)
    }
}
