//! The serialized command pipeline.
//!
//! Every operation that touches the socket is enqueued onto a single worker
//! thread owning both stream halves, so at most one command is in flight and
//! responses pair with commands in FIFO order. Callers block on a per-request
//! reply channel, which is also what reports completion of facade writes.

use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

use bytes::{BufMut, BytesMut};

use procproxy_wire::{codec, Opcode, WireReader, WireWriter, READ_NO_DATA, STATUS_OK};

use crate::connection::Shared;
use crate::error::{ProxyError, Result};

/// A queued controller operation.
pub(crate) enum Op {
    GetArgs,
    GetEnv,
    GetCwd,
    Exit(i32),
    IsInputConnected,
    ReadInput(u32),
    WriteOut(Vec<u8>),
    WriteErr(Vec<u8>),
    CloseInput,
    CloseOut,
    CloseErr,
}

impl Op {
    fn opcode(&self) -> Opcode {
        match self {
            Op::GetArgs => Opcode::GetArgs,
            Op::GetEnv => Opcode::GetEnv,
            Op::GetCwd => Opcode::GetCwd,
            Op::Exit(_) => Opcode::Exit,
            Op::IsInputConnected => Opcode::IsInputConnected,
            Op::ReadInput(_) => Opcode::ReadInput,
            Op::WriteOut(_) => Opcode::WriteOut,
            Op::WriteErr(_) => Opcode::WriteErr,
            Op::CloseInput => Opcode::CloseInput,
            Op::CloseOut => Opcode::CloseOut,
            Op::CloseErr => Opcode::CloseErr,
        }
    }

    fn is_stream_close(&self) -> bool {
        matches!(self, Op::CloseInput | Op::CloseOut | Op::CloseErr)
    }
}

/// Decoded success body of an operation.
pub(crate) enum Reply {
    Unit,
    Entries(Vec<String>),
    Text(String),
    Flag(bool),
    Input(InputChunk),
}

/// READ_INPUT outcome as seen by the input facade.
pub(crate) enum InputChunk {
    Data(Vec<u8>),
    Empty,
    Closed,
}

pub(crate) struct Pending {
    pub(crate) op: Op,
    pub(crate) reply: Sender<Result<Reply>>,
}

/// Enqueue one operation and wait for its result.
pub(crate) fn submit(tx: &Sender<Pending>, op: Op) -> Result<Reply> {
    let (reply_tx, reply_rx) = std::sync::mpsc::channel();
    tx.send(Pending { op, reply: reply_tx })
        .map_err(|_| ProxyError::ConnectionClosed)?;
    reply_rx.recv().map_err(|_| ProxyError::ConnectionClosed)?
}

pub(crate) struct Worker {
    reader: WireReader<TcpStream>,
    writer: WireWriter<TcpStream>,
    shared: Arc<Shared>,
    rx: Receiver<Pending>,
}

impl Worker {
    pub(crate) fn spawn(
        reader: WireReader<TcpStream>,
        writer: WireWriter<TcpStream>,
        shared: Arc<Shared>,
        rx: Receiver<Pending>,
    ) {
        thread::spawn(move || {
            Worker {
                reader,
                writer,
                shared,
                rx,
            }
            .run();
        });
    }

    fn run(mut self) {
        while let Ok(pending) = self.rx.recv() {
            let result = self.service(pending.op);
            let _ = pending.reply.send(result);
            if self.shared.exit_sent() && !self.shared.is_closed() {
                self.await_peer_close();
            }
        }
        // Every handle is gone; tear down and fire the close event.
        self.shared.finish_closed();
    }

    fn service(&mut self, op: Op) -> Result<Reply> {
        if self.shared.exit_sent() {
            return Err(ProxyError::AlreadyClosed);
        }
        if self.shared.is_closed() {
            // A closed stream needs no close command; everything else has no
            // socket left to use.
            return if op.is_stream_close() {
                Ok(Reply::Unit)
            } else if matches!(op, Op::Exit(_)) {
                Err(ProxyError::AlreadyClosed)
            } else {
                Err(ProxyError::ConnectionClosed)
            };
        }

        match self.exchange(&op) {
            Ok(reply) => {
                if matches!(op, Op::Exit(_)) {
                    self.shared.latch_exit();
                }
                Ok(reply)
            }
            Err(err @ ProxyError::Endpoint(_)) => Err(err),
            Err(err) => {
                // A locally initiated close aborts the in-flight command; a
                // genuine transport failure additionally raises the error
                // event.
                if self.shared.is_closed() {
                    self.shared.finish_closed();
                    return Err(ProxyError::ConnectionClosed);
                }
                tracing::debug!(%err, op = op.opcode().name(), "transport failure");
                self.shared.emit_error(&err);
                self.shared.finish_closed();
                Err(err)
            }
        }
    }

    /// Write the command frame, then read its response envelope.
    fn exchange(&mut self, op: &Op) -> Result<Reply> {
        let mut frame = BytesMut::new();
        frame.put_u8(op.opcode().as_byte());
        match op {
            Op::ReadInput(max) => frame.put_u32_le(*max),
            Op::WriteOut(data) | Op::WriteErr(data) => codec::put_lp_bytes(&mut frame, data),
            Op::Exit(code) => frame.put_i32_le(*code),
            _ => {}
        }
        self.writer.send(&frame)?;

        let status = self.reader.read_i32()?;
        if status != STATUS_OK {
            let message = self.reader.read_string()?;
            return Err(ProxyError::Endpoint(message));
        }
        self.read_body(op)
    }

    fn read_body(&mut self, op: &Op) -> Result<Reply> {
        match op {
            Op::GetArgs | Op::GetEnv => {
                let count = self.reader.read_u32()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(self.reader.read_string()?);
                }
                Ok(Reply::Entries(entries))
            }
            Op::GetCwd => Ok(Reply::Text(self.reader.read_string()?)),
            Op::IsInputConnected => Ok(Reply::Flag(self.reader.read_i32()? != 0)),
            Op::ReadInput(_) => {
                let n = self.reader.read_i32()?;
                if n > 0 {
                    let data = self.reader.read_bytes(n as usize)?;
                    Ok(Reply::Input(InputChunk::Data(data.to_vec())))
                } else if n == READ_NO_DATA {
                    Ok(Reply::Input(InputChunk::Empty))
                } else {
                    Ok(Reply::Input(InputChunk::Closed))
                }
            }
            _ => Ok(Reply::Unit),
        }
    }

    /// The endpoint acknowledged EXIT; the next event on this socket is its
    /// close, observed here so the `close` event fires without another
    /// operation being submitted.
    fn await_peer_close(&mut self) {
        if let Ok(byte) = self.reader.read_u8() {
            tracing::warn!(byte, "unexpected data after exit acknowledgement");
        }
        self.shared.finish_closed();
    }
}
