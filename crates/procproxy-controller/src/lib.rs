//! Controller side of the process-proxy channel.
//!
//! The "drive the puppet" layer: accept an endpoint's loopback connection,
//! validate its handshake token, then operate its argv, environment, working
//! directory, and standard streams through a strictly serialized command
//! channel. One command is in flight per connection at any time; responses
//! arrive in submission order.
//!
//! ```no_run
//! use std::io::Read;
//!
//! use procproxy_controller::ProxyServer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ProxyServer::bind(0)?;
//!     println!("listening on 127.0.0.1:{}", server.port());
//!
//!     let mut conn = server.accept()?;
//!     println!("token: {:?}", conn.token());
//!     println!("args: {:?}", conn.get_args()?);
//!
//!     let mut line = Vec::new();
//!     conn.stdin.read_to_end(&mut line)?;
//!     conn.exit(0)?;
//!     Ok(())
//! }
//! ```

pub mod binaries;
pub mod connection;
pub mod error;
pub mod server;
pub mod stdin;

mod output;
mod queue;

pub use binaries::{binary_name, is_supported, resolve_binary, SUPPORTED_TARGETS};
pub use connection::ProxyConnection;
pub use error::{ProxyError, Result};
pub use output::ProxyOutput;
pub use server::{ProxyServer, ServerConfig, TokenValidator};
pub use stdin::ProxyStdin;
