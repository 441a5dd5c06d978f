//! Minimal controller — accepts one endpoint and mirrors its stdin here.
//!
//! Run with:
//!   cargo run --example attach
//!
//! In another terminal (using the port this prints):
//!   PROCESS_PROXY_PORT=<port> PROCESS_PROXY_TOKEN=demo \
//!     cargo run -p procproxy-endpoint

use std::io::Read;

use procproxy_controller::ProxyServer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = ProxyServer::bind(0)?;
    eprintln!("Listening on 127.0.0.1:{}", server.port());

    let mut conn = server.accept()?;
    eprintln!("Endpoint connected, token: {:?}", conn.token());
    eprintln!("Args: {:?}", conn.get_args()?);
    eprintln!("Cwd:  {}", conn.get_cwd()?);

    // Mirror whatever is typed into the endpoint's stdin until it closes.
    let mut buf = [0u8; 4096];
    loop {
        let n = conn.stdin.read(&mut buf)?;
        if n == 0 {
            break;
        }
        print!("{}", String::from_utf8_lossy(&buf[..n]));
    }

    eprintln!("Input closed; asking the endpoint to exit");
    conn.exit(0)?;
    Ok(())
}
