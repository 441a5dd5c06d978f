//! The two writable output facades.
//!
//! Identical sinks for the endpoint's stdout and stderr. Each write turns
//! into exactly one WRITE_OUT/WRITE_ERR command and returns only after the
//! endpoint's response arrives, so completion means delivery. Dropping an
//! unclosed facade sends the matching close command once.

use std::io::Write;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::connection::Shared;
use crate::error::Result;
use crate::queue::{submit, Op, Pending};

/// Which endpoint stream a facade feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputKind {
    Out,
    Err,
}

impl OutputKind {
    pub(crate) fn close_op(self) -> Op {
        match self {
            OutputKind::Out => Op::CloseOut,
            OutputKind::Err => Op::CloseErr,
        }
    }

    fn write_op(self, data: Vec<u8>) -> Op {
        match self {
            OutputKind::Out => Op::WriteOut(data),
            OutputKind::Err => Op::WriteErr(data),
        }
    }
}

pub struct ProxyOutput {
    kind: OutputKind,
    tx: Sender<Pending>,
    shared: Arc<Shared>,
}

impl ProxyOutput {
    pub(crate) fn new(kind: OutputKind, tx: Sender<Pending>, shared: Arc<Shared>) -> Self {
        Self { kind, tx, shared }
    }

    /// Close the endpoint's stream explicitly.
    ///
    /// The endpoint rejects a second close with an error, which is returned
    /// to the caller. A later drop of this facade sends nothing further.
    pub fn close(&mut self) -> Result<()> {
        let result = submit(&self.tx, self.kind.close_op()).map(|_| ());
        self.shared.mark_output_closed(self.kind);
        result
    }
}

impl Write for ProxyOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.shared.facades_dead() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "stream facade destroyed",
            ));
        }
        submit(&self.tx, self.kind.write_op(buf.to_vec()))
            .map_err(std::io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Writes already block until the endpoint's response.
        Ok(())
    }
}

impl Drop for ProxyOutput {
    fn drop(&mut self) {
        if self.shared.facades_dead()
            || self.shared.exit_sent()
            || self.shared.is_closed()
            || self.shared.output_closed(self.kind)
        {
            return;
        }
        self.shared.mark_output_closed(self.kind);
        let _ = submit(&self.tx, self.kind.close_op());
    }
}

impl std::fmt::Debug for ProxyOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyOutput")
            .field("kind", &self.kind)
            .field("closed", &self.shared.output_closed(self.kind))
            .finish()
    }
}
