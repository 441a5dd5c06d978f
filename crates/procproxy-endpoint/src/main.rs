//! Native proxy endpoint.
//!
//! Spawned with its port and token in the environment, this binary dials the
//! controller on loopback, sends the 146-byte handshake, and then serves
//! commands until the controller hangs up or asks it to exit. Its argv,
//! environment, working directory, and standard streams are exactly the
//! process-global state the controller observes and drives.

mod session;
mod stdio;

use std::io::Write;
use std::net::{Ipv4Addr, TcpStream};

use procproxy_wire::handshake;

use crate::session::Session;
use crate::stdio::ProcessIo;

const PORT_VAR: &str = "PROCESS_PROXY_PORT";
const TOKEN_VAR: &str = "PROCESS_PROXY_TOKEN";
const LOG_VAR: &str = "PROCESS_PROXY_LOG";

// Boot failure codes. A clean command-loop exit is 0; an EXIT command
// substitutes its own code.
const EXIT_BAD_PORT: i32 = 2;
const EXIT_CONNECT_FAILED: i32 = 3;
const EXIT_HANDSHAKE_FAILED: i32 = 4;

fn main() {
    init_diagnostics();
    std::process::exit(run());
}

fn run() -> i32 {
    let port = match read_port() {
        Ok(port) => port,
        Err(message) => {
            eprintln!("process-proxy endpoint: {message}");
            return EXIT_BAD_PORT;
        }
    };

    let mut stream = match TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("process-proxy endpoint: failed to connect to 127.0.0.1:{port}: {err}");
            return EXIT_CONNECT_FAILED;
        }
    };

    let token = std::env::var_os(TOKEN_VAR)
        .map(|raw| raw.into_encoded_bytes())
        .unwrap_or_default();
    let block = handshake::encode_handshake(&token);
    if let Err(err) = stream.write_all(&block).and_then(|()| stream.flush()) {
        eprintln!("process-proxy endpoint: handshake send failed: {err}");
        return EXIT_HANDSHAKE_FAILED;
    }
    tracing::debug!(port, "handshake sent");

    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            eprintln!("process-proxy endpoint: socket clone failed: {err}");
            return EXIT_CONNECT_FAILED;
        }
    };

    let mut host = ProcessIo::new();
    let mut session = Session::new(reader, stream);
    match session.run(&mut host) {
        Some(code) => code,
        None => 0,
    }
}

fn read_port() -> Result<u16, String> {
    let raw = std::env::var(PORT_VAR)
        .map_err(|_| format!("environment variable {PORT_VAR} not set"))?;
    let port: u16 = raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid port number in {PORT_VAR}: {raw}"))?;
    if port == 0 {
        return Err(format!("invalid port number in {PORT_VAR}: {raw}"));
    }
    Ok(port)
}

/// Diagnostics are opt-in: stderr belongs to the proxied process, so tracing
/// stays silent unless the operator sets `PROCESS_PROXY_LOG`.
fn init_diagnostics() {
    let Some(level) = std::env::var_os(LOG_VAR) else {
        return;
    };
    let filter = match level.to_string_lossy().as_ref() {
        "error" => tracing::level_filters::LevelFilter::ERROR,
        "warn" => tracing::level_filters::LevelFilter::WARN,
        "debug" => tracing::level_filters::LevelFilter::DEBUG,
        "trace" => tracing::level_filters::LevelFilter::TRACE,
        _ => tracing::level_filters::LevelFilter::INFO,
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(filter)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
