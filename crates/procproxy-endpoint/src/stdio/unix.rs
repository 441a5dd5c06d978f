//! Unix descriptor operations for the proxied streams.
//!
//! READ_INPUT must never block the command loop: stdin is flipped to
//! `O_NONBLOCK` for the duration of one read and restored afterwards, the
//! same toggle-and-restore dance interactive terminals use.

use std::io::{self, ErrorKind, Write};

pub(super) enum RawRead {
    Data(usize),
    WouldBlock,
    Eof,
    Failed,
}

pub(super) fn read_nonblocking(buf: &mut [u8]) -> RawRead {
    let fd = libc::STDIN_FILENO;
    // SAFETY: fcntl/read operate on a descriptor owned by this process and
    // `buf` is valid for `buf.len()` writable bytes.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return RawRead::Failed;
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return RawRead::Failed;
        }

        let n = libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len());
        let read_err = if n < 0 {
            Some(io::Error::last_os_error())
        } else {
            None
        };

        // Restore the original mode before interpreting the result.
        let _ = libc::fcntl(fd, libc::F_SETFL, flags);

        match (n, read_err) {
            (0, _) => RawRead::Eof,
            (n, None) => RawRead::Data(n as usize),
            (_, Some(err)) if err.kind() == ErrorKind::WouldBlock => RawRead::WouldBlock,
            (_, Some(_)) => RawRead::Failed,
        }
    }
}

/// Bytes currently buffered on stdin, if the kernel will tell us.
pub(super) fn buffered_input_bytes() -> usize {
    let mut available: libc::c_int = 0;
    // SAFETY: FIONREAD writes one c_int through a valid pointer.
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::FIONREAD, &mut available) };
    if rc == 0 && available > 0 {
        available as usize
    } else {
        0
    }
}

/// True when stdin is readable but holds zero bytes, i.e. the next read
/// would report end-of-input.
pub(super) fn eof_pending() -> bool {
    let mut fds = libc::pollfd {
        fd: libc::STDIN_FILENO,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: poll reads one pollfd record with a zero timeout.
    let rc = unsafe { libc::poll(&mut fds, 1, 0) };
    rc > 0 && fds.revents & (libc::POLLIN | libc::POLLHUP) != 0 && buffered_input_bytes() == 0
}

pub(super) fn write_output(data: &[u8]) -> io::Result<()> {
    let mut out = io::stdout().lock();
    out.write_all(data)?;
    out.flush()
}

pub(super) fn write_error(data: &[u8]) -> io::Result<()> {
    let mut err = io::stderr().lock();
    err.write_all(data)?;
    err.flush()
}

pub(super) fn close_input() -> io::Result<()> {
    close_fd(libc::STDIN_FILENO)
}

pub(super) fn close_output() -> io::Result<()> {
    let _ = io::stdout().lock().flush();
    close_fd(libc::STDOUT_FILENO)
}

pub(super) fn close_error() -> io::Result<()> {
    let _ = io::stderr().lock().flush();
    close_fd(libc::STDERR_FILENO)
}

fn close_fd(fd: libc::c_int) -> io::Result<()> {
    // SAFETY: the caller's closed-flag bookkeeping prevents a double close.
    if unsafe { libc::close(fd) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(super) fn current_dir_string() -> io::Result<String> {
    let dir = std::env::current_dir()?;
    Ok(dir.to_string_lossy().into_owned())
}
