//! Windows handle operations for the proxied streams.
//!
//! Windows has no per-read non-blocking mode for anonymous pipes, so
//! READ_INPUT peeks the number of buffered bytes first and reads at most
//! that many — the read itself then cannot block. A failing peek means the
//! write end is gone, which maps to the closed-input signal.

use std::io::{self, Write};
use std::os::windows::ffi::OsStrExt;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{GetShortPathNameW, ReadFile};
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Pipes::PeekNamedPipe;

/// Paths longer than this are shortened before crossing the wire.
const DEFAULT_PATH_LIMIT: usize = 260;

pub(super) enum RawRead {
    Data(usize),
    WouldBlock,
    Eof,
    Failed,
}

fn stdin_handle() -> Option<HANDLE> {
    // SAFETY: querying a standard handle has no preconditions.
    let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) };
    if handle == INVALID_HANDLE_VALUE || handle.is_null() {
        None
    } else {
        Some(handle)
    }
}

fn peek_available(handle: HANDLE) -> Option<u32> {
    let mut available: u32 = 0;
    // SAFETY: only the total-bytes-available out-parameter is requested;
    // every other pointer is allowed to be null.
    let ok = unsafe {
        PeekNamedPipe(
            handle,
            std::ptr::null_mut(),
            0,
            std::ptr::null_mut(),
            &mut available,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        None
    } else {
        Some(available)
    }
}

pub(super) fn read_nonblocking(buf: &mut [u8]) -> RawRead {
    let Some(handle) = stdin_handle() else {
        return RawRead::Failed;
    };
    let Some(available) = peek_available(handle) else {
        // Peek fails once the writing side has closed the pipe.
        return RawRead::Eof;
    };
    if available == 0 {
        return RawRead::WouldBlock;
    }

    let to_read = (available as usize).min(buf.len()) as u32;
    let mut read: u32 = 0;
    // SAFETY: `buf` is valid for `to_read` writable bytes and the handle was
    // just validated; no OVERLAPPED structure is used.
    let ok = unsafe {
        ReadFile(
            handle,
            buf.as_mut_ptr().cast(),
            to_read,
            &mut read,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return RawRead::Failed;
    }
    if read == 0 {
        RawRead::Eof
    } else {
        RawRead::Data(read as usize)
    }
}

pub(super) fn buffered_input_bytes() -> usize {
    stdin_handle()
        .and_then(peek_available)
        .map(|available| available as usize)
        .unwrap_or(0)
}

pub(super) fn eof_pending() -> bool {
    match stdin_handle() {
        Some(handle) => peek_available(handle).is_none(),
        None => true,
    }
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
    close_std_handle(STD_INPUT_HANDLE)
}

pub(super) fn close_output() -> io::Result<()> {
    let _ = io::stdout().lock().flush();
    close_std_handle(STD_OUTPUT_HANDLE)
}

pub(super) fn close_error() -> io::Result<()> {
    let _ = io::stderr().lock().flush();
    close_std_handle(STD_ERROR_HANDLE)
}

fn close_std_handle(which: u32) -> io::Result<()> {
    // SAFETY: the caller's closed-flag bookkeeping prevents a double close.
    unsafe {
        let handle = GetStdHandle(which);
        if handle == INVALID_HANDLE_VALUE || handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        if CloseHandle(handle) == 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(super) fn current_dir_string() -> io::Result<String> {
    let dir = std::env::current_dir()?;
    let text = dir.to_string_lossy().into_owned();
    if text.len() <= DEFAULT_PATH_LIMIT {
        return Ok(text);
    }
    // Over-long directories are converted to their short-path form so the
    // result fits a moderate-length path.
    match short_path(dir.as_os_str()) {
        Some(short) => Ok(short),
        None => Ok(text),
    }
}

fn short_path(path: &std::ffi::OsStr) -> Option<String> {
    let wide: Vec<u16> = path.encode_wide().chain(std::iter::once(0)).collect();
    // SAFETY: first call sizes the buffer, second call fills it; both get
    // valid NUL-terminated input.
    unsafe {
        let needed = GetShortPathNameW(wide.as_ptr(), std::ptr::null_mut(), 0);
        if needed == 0 {
            return None;
        }
        let mut out = vec![0u16; needed as usize];
        let written = GetShortPathNameW(wide.as_ptr(), out.as_mut_ptr(), needed);
        if written == 0 || written as usize >= out.len() {
            return None;
        }
        out.truncate(written as usize);
        Some(String::from_utf16_lossy(&out))
    }
}
