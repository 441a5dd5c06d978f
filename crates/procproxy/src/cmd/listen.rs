use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use procproxy_controller::{ProxyConnection, ProxyServer};

use crate::cmd::ListenArgs;
use crate::exit::{proxy_error, CliError, CliResult, SUCCESS};
use crate::output::{print_session, OutputFormat, SessionOutput};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut server = ProxyServer::bind(args.port)
        .map_err(|err| proxy_error("bind failed", err))?
        .with_handshake_timeout(Duration::from_millis(args.handshake_timeout_ms));
    if let Some(expected) = args.token.clone() {
        server = server.with_validator(move |token| token == expected);
    }

    tracing::info!(port = server.port(), "listening for endpoints");
    println!("listening on 127.0.0.1:{}", server.port());

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut served = 0usize;
    while running.load(Ordering::SeqCst) {
        let conn = match server.accept() {
            Ok(conn) => conn,
            Err(err) => return Err(proxy_error("accept failed", err)),
        };

        serve_connection(conn, &args, format)?;
        served = served.saturating_add(1);

        if let Some(count) = args.count {
            if served >= count {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}

fn serve_connection(
    mut conn: ProxyConnection,
    args: &ListenArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let args_list = conn
        .get_args()
        .map_err(|err| proxy_error("GET_ARGS failed", err))?;
    let cwd = conn
        .get_cwd()
        .map_err(|err| proxy_error("GET_CWD failed", err))?;
    let env_count = conn
        .get_env()
        .map_err(|err| proxy_error("GET_ENV failed", err))?
        .len();
    let session = SessionOutput::new(conn.token(), args_list, cwd, env_count);
    print_session(&session, format);

    if args.relay {
        relay_input(&mut conn)?;
    }

    if let Some(code) = args.exit_code {
        conn.exit(code)
            .map_err(|err| proxy_error("EXIT failed", err))?;
    }
    Ok(())
}

/// Pump the endpoint's stdin to local stdout until the terminal signal.
fn relay_input(conn: &mut ProxyConnection) -> CliResult<()> {
    let mut stdout = std::io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let n = conn
            .stdin
            .read(&mut buf)
            .map_err(|err| CliError::new(crate::exit::FAILURE, format!("relay failed: {err}")))?;
        if n == 0 {
            return Ok(());
        }
        stdout
            .write_all(&buf[..n])
            .and_then(|()| stdout.flush())
            .map_err(|err| CliError::new(crate::exit::FAILURE, format!("relay failed: {err}")))?;
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
