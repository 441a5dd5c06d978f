//! Access to the process-global state the endpoint proxies.
//!
//! [`HostIo`] is the seam between the command loop and the operating system:
//! the real implementation ([`ProcessIo`]) touches the process's standard
//! descriptors, arguments, environment, and working directory, while tests
//! substitute scripted hosts.

use std::io;

#[cfg(unix)]
#[path = "unix.rs"]
mod platform;

#[cfg(windows)]
#[path = "windows.rs"]
mod platform;

/// Outcome of one non-blocking input read.
pub enum InputRead {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// Nothing available right now; the source is still open.
    NoData,
    /// The source has been closed; no further data will arrive.
    Closed,
}

/// Process-global state operations used by the command loop.
pub trait HostIo {
    /// Argv captured at startup.
    fn args(&self) -> &[String];
    /// Environment entries in `KEY=VALUE` form, read on demand.
    fn env_entries(&self) -> Vec<String>;
    /// Absolute current working directory, read on demand.
    fn cwd(&self) -> io::Result<String>;
    /// Non-blocking read from standard input.
    fn read_input(&mut self, buf: &mut [u8]) -> InputRead;
    /// Whether input is attached and still able to deliver bytes.
    fn input_connected(&mut self) -> bool;
    /// Write and flush a buffer to standard output.
    fn write_output(&mut self, data: &[u8]) -> io::Result<()>;
    /// Write and flush a buffer to standard error.
    fn write_error(&mut self, data: &[u8]) -> io::Result<()>;
    /// Close standard input. Errors on the second attempt.
    fn close_input(&mut self) -> io::Result<()>;
    /// Close standard output. Errors on the second attempt.
    fn close_output(&mut self) -> io::Result<()>;
    /// Close standard error. Errors on the second attempt.
    fn close_error(&mut self) -> io::Result<()>;
}

/// The real process streams.
pub struct ProcessIo {
    args: Vec<String>,
    input_closed: bool,
    input_eof: bool,
    output_closed: bool,
    error_closed: bool,
}

impl ProcessIo {
    pub fn new() -> Self {
        Self {
            args: std::env::args_os()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            input_closed: false,
            input_eof: false,
            output_closed: false,
            error_closed: false,
        }
    }
}

impl Default for ProcessIo {
    fn default() -> Self {
        Self::new()
    }
}

fn already_closed(stream: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{stream} already closed"))
}

impl HostIo for ProcessIo {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn env_entries(&self) -> Vec<String> {
        std::env::vars_os()
            .map(|(key, value)| {
                let mut entry = key.to_string_lossy().into_owned();
                entry.push('=');
                entry.push_str(&value.to_string_lossy());
                entry
            })
            .collect()
    }

    fn cwd(&self) -> io::Result<String> {
        platform::current_dir_string()
    }

    fn read_input(&mut self, buf: &mut [u8]) -> InputRead {
        if self.input_closed || self.input_eof {
            return InputRead::Closed;
        }
        match platform::read_nonblocking(buf) {
            platform::RawRead::Data(n) => InputRead::Data(n),
            platform::RawRead::WouldBlock => InputRead::NoData,
            platform::RawRead::Eof => {
                self.input_eof = true;
                InputRead::Closed
            }
            // Read failures other than would-block count as a closed source.
            platform::RawRead::Failed => {
                self.input_eof = true;
                InputRead::Closed
            }
        }
    }

    fn input_connected(&mut self) -> bool {
        if self.input_closed || self.input_eof {
            return false;
        }
        if platform::buffered_input_bytes() > 0 {
            return true;
        }
        !platform::eof_pending()
    }

    fn write_output(&mut self, data: &[u8]) -> io::Result<()> {
        if self.output_closed {
            return Err(already_closed("stdout"));
        }
        platform::write_output(data)
    }

    fn write_error(&mut self, data: &[u8]) -> io::Result<()> {
        if self.error_closed {
            return Err(already_closed("stderr"));
        }
        platform::write_error(data)
    }

    fn close_input(&mut self) -> io::Result<()> {
        if self.input_closed {
            return Err(already_closed("stdin"));
        }
        self.input_closed = true;
        platform::close_input()
    }

    fn close_output(&mut self) -> io::Result<()> {
        if self.output_closed {
            return Err(already_closed("stdout"));
        }
        self.output_closed = true;
        platform::close_output()
    }

    fn close_error(&mut self) -> io::Result<()> {
        if self.error_closed {
            return Err(already_closed("stderr"));
        }
        self.error_closed = true;
        platform::close_error()
    }
}
