//! The readable input facade.
//!
//! A lazy, finite byte sequence over the endpoint's stdin. Each demand
//! issues one bounded READ_INPUT command; "no data" answers are retried
//! after the configured poll interval, and the closed-input signal ends the
//! sequence for good. Pulling only on demand is what gives the consumer
//! backpressure: no reads are issued while nobody is asking.

use std::io::Read;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::connection::Shared;
use crate::error::Result;
use crate::queue::{submit, InputChunk, Op, Pending, Reply};

pub struct ProxyStdin {
    tx: Sender<Pending>,
    shared: Arc<Shared>,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl ProxyStdin {
    pub(crate) fn new(tx: Sender<Pending>, shared: Arc<Shared>) -> Self {
        Self {
            tx,
            shared,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// Close the endpoint's stdin and end this sequence immediately, even if
    /// the endpoint still had data buffered.
    ///
    /// The endpoint rejects a second close with an error, which is returned
    /// to the caller.
    pub fn close(&mut self) -> Result<()> {
        self.eof = true;
        self.buf.clear();
        self.pos = 0;
        submit(&self.tx, Op::CloseInput).map(|_| ())
    }

    /// True once the terminal closed-input signal has been observed.
    pub fn at_eof(&self) -> bool {
        self.eof && self.pos >= self.buf.len()
    }
}

impl Read for ProxyStdin {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }

        loop {
            if self.shared.facades_dead() {
                self.eof = true;
                return Ok(0);
            }
            match submit(&self.tx, Op::ReadInput(self.shared.read_chunk)) {
                Ok(Reply::Input(InputChunk::Data(data))) => {
                    let n = data.len().min(out.len());
                    out[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.buf = data;
                        self.pos = n;
                    } else {
                        self.buf.clear();
                        self.pos = 0;
                    }
                    return Ok(n);
                }
                Ok(Reply::Input(InputChunk::Empty)) => {
                    std::thread::sleep(self.shared.poll_interval);
                }
                Ok(Reply::Input(InputChunk::Closed)) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(_) => {
                    return Err(std::io::Error::other("unexpected reply to input read"));
                }
                Err(err) => {
                    self.eof = true;
                    return Err(err.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for ProxyStdin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyStdin")
            .field("buffered", &(self.buf.len() - self.pos))
            .field("eof", &self.eof)
            .finish()
    }
}
