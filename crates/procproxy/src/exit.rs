use std::fmt;
use std::io;

use procproxy_controller::ProxyError;
use procproxy_wire::WireError;

// Exit code table shared by every subcommand.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::FieldTooLarge { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        WireError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn proxy_error(context: &str, err: ProxyError) -> CliError {
    match err {
        ProxyError::Wire(err) => wire_error(context, err),
        ProxyError::Bind(source) | ProxyError::Accept(source) => io_error(context, source),
        ProxyError::Handshake(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        ProxyError::Endpoint(_) | ProxyError::Protocol(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ProxyError::ConnectionClosed | ProxyError::AlreadyClosed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        ProxyError::UnsupportedTarget { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_maps_to_failure() {
        let err = io_error(
            "connect",
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn unsupported_target_is_a_usage_error() {
        let err = proxy_error(
            "resolve",
            ProxyError::UnsupportedTarget {
                os: "beos".into(),
                arch: "m68k".into(),
            },
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("beos-m68k"));
    }

    #[test]
    fn endpoint_errors_keep_their_message() {
        let err = proxy_error("close", ProxyError::Endpoint("stdin already closed".into()));
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("stdin already closed"));
    }
}
