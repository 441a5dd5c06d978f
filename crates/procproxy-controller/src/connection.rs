//! One live endpoint connection.
//!
//! A [`ProxyConnection`] owns the socket for its whole life: commands are
//! serialized through the worker in [`crate::queue`], the three stream
//! facades feed the same queue, and lifecycle events (`close` once, `error`
//! zero or more times) fan out to registered handlers.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use procproxy_wire::{WireError, WireReader, WireWriter};

use crate::error::{ProxyError, Result};
use crate::output::{OutputKind, ProxyOutput};
use crate::queue::{submit, Op, Pending, Reply, Worker};
use crate::server::ServerConfig;
use crate::stdin::ProxyStdin;

type CloseHandler = Box<dyn FnMut() + Send>;
type ErrorHandler = Box<dyn FnMut(&ProxyError) + Send>;

/// State shared between the connection handle, its facades, and the worker.
pub(crate) struct Shared {
    stream: TcpStream,
    closed: AtomicBool,
    exit_sent: AtomicBool,
    facades_dead: AtomicBool,
    out_closed: AtomicBool,
    err_closed: AtomicBool,
    close_fired: AtomicBool,
    close_handlers: Mutex<Vec<CloseHandler>>,
    error_handlers: Mutex<Vec<ErrorHandler>>,
    pub(crate) poll_interval: Duration,
    pub(crate) read_chunk: u32,
}

impl Shared {
    fn new(stream: TcpStream, config: &ServerConfig) -> Self {
        Self {
            stream,
            closed: AtomicBool::new(false),
            exit_sent: AtomicBool::new(false),
            facades_dead: AtomicBool::new(false),
            out_closed: AtomicBool::new(false),
            err_closed: AtomicBool::new(false),
            close_fired: AtomicBool::new(false),
            close_handlers: Mutex::new(Vec::new()),
            error_handlers: Mutex::new(Vec::new()),
            poll_interval: config.poll_interval,
            read_chunk: config.read_chunk,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn exit_sent(&self) -> bool {
        self.exit_sent.load(Ordering::SeqCst)
    }

    pub(crate) fn latch_exit(&self) {
        self.exit_sent.store(true, Ordering::SeqCst);
    }

    pub(crate) fn facades_dead(&self) -> bool {
        self.facades_dead.load(Ordering::SeqCst)
    }

    pub(crate) fn kill_facades(&self) {
        self.facades_dead.store(true, Ordering::SeqCst);
    }

    pub(crate) fn output_closed(&self, kind: OutputKind) -> bool {
        self.output_flag(kind).load(Ordering::SeqCst)
    }

    pub(crate) fn mark_output_closed(&self, kind: OutputKind) {
        self.output_flag(kind).store(true, Ordering::SeqCst);
    }

    fn output_flag(&self, kind: OutputKind) -> &AtomicBool {
        match kind {
            OutputKind::Out => &self.out_closed,
            OutputKind::Err => &self.err_closed,
        }
    }

    pub(crate) fn emit_error(&self, err: &ProxyError) {
        if let Ok(mut handlers) = self.error_handlers.lock() {
            for handler in handlers.iter_mut() {
                handler(err);
            }
        }
    }

    /// Mark the connection closed, shut the socket down, and fire the close
    /// event. Safe to call from any thread; every effect happens once.
    pub(crate) fn finish_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
        if !self.close_fired.swap(true, Ordering::SeqCst) {
            if let Ok(mut handlers) = self.close_handlers.lock() {
                for handler in handlers.iter_mut() {
                    handler();
                }
                handlers.clear();
            }
        }
    }

    fn register_close(&self, mut handler: CloseHandler) {
        if self.close_fired.load(Ordering::SeqCst) {
            handler();
            return;
        }
        if let Ok(mut handlers) = self.close_handlers.lock() {
            handlers.push(handler);
        }
    }

    fn register_error(&self, handler: ErrorHandler) {
        if let Ok(mut handlers) = self.error_handlers.lock() {
            handlers.push(handler);
        }
    }
}

/// A validated connection to one endpoint process.
pub struct ProxyConnection {
    token: String,
    shared: Arc<Shared>,
    tx: Sender<Pending>,
    /// Lazy byte sequence of whatever arrives on the endpoint's stdin.
    pub stdin: ProxyStdin,
    /// Writable sink feeding the endpoint's stdout.
    pub stdout: ProxyOutput,
    /// Writable sink feeding the endpoint's stderr.
    pub stderr: ProxyOutput,
}

impl ProxyConnection {
    pub(crate) fn new(
        stream: TcpStream,
        token: String,
        leftover: Bytes,
        config: &ServerConfig,
    ) -> Result<Self> {
        let reader_stream = stream.try_clone().map_err(WireError::Io)?;
        let shutdown_handle = stream.try_clone().map_err(WireError::Io)?;

        let shared = Arc::new(Shared::new(shutdown_handle, config));
        let (tx, rx) = std::sync::mpsc::channel();
        Worker::spawn(
            WireReader::with_leftover(reader_stream, leftover),
            WireWriter::new(stream),
            Arc::clone(&shared),
            rx,
        );

        Ok(Self {
            token,
            stdin: ProxyStdin::new(tx.clone(), Arc::clone(&shared)),
            stdout: ProxyOutput::new(OutputKind::Out, tx.clone(), Arc::clone(&shared)),
            stderr: ProxyOutput::new(OutputKind::Err, tx.clone(), Arc::clone(&shared)),
            shared,
            tx,
        })
    }

    /// The authentication token captured at handshake. Immutable.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// True once the socket has closed or an exit has been dispatched.
    pub fn closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Register a handler for the close event. Fires exactly once; handlers
    /// registered after the fact are invoked immediately.
    pub fn on_close(&self, handler: impl FnMut() + Send + 'static) {
        self.shared.register_close(Box::new(handler));
    }

    /// Register a handler for transport errors. May fire zero or more times.
    pub fn on_error(&self, handler: impl FnMut(&ProxyError) + Send + 'static) {
        self.shared.register_error(Box::new(handler));
    }

    /// The endpoint's argv, captured when it started.
    pub fn get_args(&self) -> Result<Vec<String>> {
        match submit(&self.tx, Op::GetArgs)? {
            Reply::Entries(args) => Ok(args),
            _ => Err(ProxyError::Protocol("unexpected GET_ARGS reply".into())),
        }
    }

    /// The endpoint's environment. Entries without `=` are dropped here;
    /// the wire still transports them.
    pub fn get_env(&self) -> Result<HashMap<String, String>> {
        match submit(&self.tx, Op::GetEnv)? {
            Reply::Entries(entries) => Ok(entries
                .into_iter()
                .filter_map(|entry| {
                    entry
                        .split_once('=')
                        .map(|(key, value)| (key.to_string(), value.to_string()))
                })
                .collect()),
            _ => Err(ProxyError::Protocol("unexpected GET_ENV reply".into())),
        }
    }

    /// The endpoint's current working directory, absolute.
    pub fn get_cwd(&self) -> Result<String> {
        match submit(&self.tx, Op::GetCwd)? {
            Reply::Text(path) => Ok(path),
            _ => Err(ProxyError::Protocol("unexpected GET_CWD reply".into())),
        }
    }

    /// Whether the endpoint's stdin is still open or holds undelivered bytes.
    pub fn is_input_connected(&self) -> Result<bool> {
        match submit(&self.tx, Op::IsInputConnected)? {
            Reply::Flag(connected) => Ok(connected),
            _ => Err(ProxyError::Protocol(
                "unexpected IS_INPUT_CONNECTED reply".into(),
            )),
        }
    }

    /// Terminate the endpoint with `code`.
    ///
    /// The facades are destroyed first, so writes they already queued drain
    /// ahead of the exit command; EXIT is the last observable effect on the
    /// socket. After success every further operation rejects locally.
    pub fn exit(&mut self, code: i32) -> Result<()> {
        if self.shared.is_closed() || self.shared.exit_sent() {
            return Err(ProxyError::AlreadyClosed);
        }
        self.destroy_facades();
        submit(&self.tx, Op::Exit(code)).map(|_| ())
    }

    fn destroy_facades(&mut self) {
        self.shared.kill_facades();
        for kind in [OutputKind::Out, OutputKind::Err] {
            if !self.shared.output_closed(kind) {
                self.shared.mark_output_closed(kind);
                let _ = submit(&self.tx, kind.close_op());
            }
        }
    }

    /// Close the connection. Idempotent; aborts whatever is in flight with a
    /// connection-closed error and fires the close event.
    pub fn close(&self) {
        self.shared.finish_closed();
    }
}

impl std::fmt::Debug for ProxyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConnection")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("closed", &self.closed())
            .finish()
    }
}
