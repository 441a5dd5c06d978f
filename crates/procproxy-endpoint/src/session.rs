//! The blocking command loop.
//!
//! Single-threaded: one opcode byte is read, its payload is consumed in
//! full, one response envelope is written in full, and only then is the next
//! opcode read. The endpoint never initiates traffic, so every byte it sends
//! belongs to the response for the most recent command.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use procproxy_wire::{
    codec, Opcode, WireError, WireReader, WireWriter, READ_CLOSED, READ_NO_DATA,
};

use crate::stdio::{HostIo, InputRead};

/// Upper bound on a single READ_INPUT service. A positive reply never
/// promises that more data remains buffered, so capping the allocation is
/// invisible to the peer.
const MAX_INPUT_CHUNK: usize = 1024 * 1024;

enum Flow {
    Continue,
    Exit(i32),
}

/// One command-serving session over a connected socket pair of halves.
pub struct Session<R, W> {
    reader: WireReader<R>,
    writer: WireWriter<W>,
}

impl<R: Read, W: Write> Session<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: WireReader::new(reader),
            writer: WireWriter::new(writer),
        }
    }

    /// Serve commands until end-of-stream, a fatal transport error, an
    /// unknown opcode, or EXIT. Returns the exit status requested via EXIT,
    /// if any; the EXIT response is written and flushed before returning.
    pub fn run(&mut self, host: &mut dyn HostIo) -> Option<i32> {
        loop {
            let byte = match self.reader.read_u8() {
                Ok(byte) => byte,
                Err(WireError::ConnectionClosed) => {
                    tracing::debug!("controller closed the connection");
                    return None;
                }
                Err(err) => {
                    tracing::debug!(%err, "transport error while waiting for a command");
                    return None;
                }
            };

            let Some(op) = Opcode::from_byte(byte) else {
                tracing::debug!(opcode = byte, "unknown opcode, closing session");
                return None;
            };

            match self.dispatch(op, host) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit(code)) => return Some(code),
                Err(err) => {
                    tracing::debug!(%err, op = op.name(), "transport failure during command");
                    return None;
                }
            }
        }
    }

    fn dispatch(&mut self, op: Opcode, host: &mut dyn HostIo) -> procproxy_wire::Result<Flow> {
        match op {
            Opcode::GetArgs => self.get_args(host),
            Opcode::ReadInput => self.read_input(host),
            Opcode::WriteOut => self.write_stream(host, Opcode::WriteOut),
            Opcode::WriteErr => self.write_stream(host, Opcode::WriteErr),
            Opcode::GetCwd => self.get_cwd(host),
            Opcode::GetEnv => self.get_env(host),
            Opcode::Exit => self.exit(),
            Opcode::CloseInput => self.close_stream(host.close_input()),
            Opcode::CloseOut => self.close_stream(host.close_output()),
            Opcode::CloseErr => self.close_stream(host.close_error()),
            Opcode::IsInputConnected => self.is_input_connected(host),
        }
    }

    fn get_args(&mut self, host: &mut dyn HostIo) -> procproxy_wire::Result<Flow> {
        let args = host.args().to_vec();
        let mut resp = BytesMut::new();
        codec::put_status_ok(&mut resp);
        resp.put_u32_le(args.len() as u32);
        for arg in &args {
            codec::put_lp_str(&mut resp, arg);
        }
        self.writer.send(&resp)?;
        Ok(Flow::Continue)
    }

    fn read_input(&mut self, host: &mut dyn HostIo) -> procproxy_wire::Result<Flow> {
        let max = self.reader.read_u32()? as usize;
        let mut resp = BytesMut::new();
        codec::put_status_ok(&mut resp);
        if max == 0 {
            resp.put_i32_le(READ_NO_DATA);
            self.writer.send(&resp)?;
            return Ok(Flow::Continue);
        }

        let mut buf = vec![0u8; max.min(MAX_INPUT_CHUNK)];
        match host.read_input(&mut buf) {
            InputRead::Data(n) => {
                resp.put_i32_le(n as i32);
                resp.put_slice(&buf[..n]);
            }
            InputRead::NoData => resp.put_i32_le(READ_NO_DATA),
            InputRead::Closed => resp.put_i32_le(READ_CLOSED),
        }
        self.writer.send(&resp)?;
        Ok(Flow::Continue)
    }

    fn write_stream(&mut self, host: &mut dyn HostIo, op: Opcode) -> procproxy_wire::Result<Flow> {
        let len = self.reader.read_u32()? as usize;
        let data = self.reader.read_bytes(len)?;
        let outcome = match op {
            Opcode::WriteErr => host.write_error(&data),
            _ => host.write_output(&data),
        };
        match outcome {
            Ok(()) => self.respond_ok_empty()?,
            Err(err) => self.respond_error(&err.to_string())?,
        }
        Ok(Flow::Continue)
    }

    fn get_cwd(&mut self, host: &mut dyn HostIo) -> procproxy_wire::Result<Flow> {
        match host.cwd() {
            Ok(path) => {
                let mut resp = BytesMut::new();
                codec::put_status_ok(&mut resp);
                codec::put_lp_str(&mut resp, &path);
                self.writer.send(&resp)?;
            }
            Err(err) => self.respond_error(&err.to_string())?,
        }
        Ok(Flow::Continue)
    }

    fn get_env(&mut self, host: &mut dyn HostIo) -> procproxy_wire::Result<Flow> {
        let entries = host.env_entries();
        let mut resp = BytesMut::new();
        codec::put_status_ok(&mut resp);
        resp.put_u32_le(entries.len() as u32);
        for entry in &entries {
            codec::put_lp_str(&mut resp, entry);
        }
        self.writer.send(&resp)?;
        Ok(Flow::Continue)
    }

    fn exit(&mut self) -> procproxy_wire::Result<Flow> {
        let code = self.reader.read_i32()?;
        // Acknowledge before terminating: the controller must observe the
        // status before it observes the socket close.
        self.respond_ok_empty()?;
        Ok(Flow::Exit(code))
    }

    fn close_stream(&mut self, outcome: std::io::Result<()>) -> procproxy_wire::Result<Flow> {
        match outcome {
            Ok(()) => self.respond_ok_empty()?,
            Err(err) => self.respond_error(&err.to_string())?,
        }
        Ok(Flow::Continue)
    }

    fn is_input_connected(&mut self, host: &mut dyn HostIo) -> procproxy_wire::Result<Flow> {
        let connected = host.input_connected();
        let mut resp = BytesMut::new();
        codec::put_status_ok(&mut resp);
        resp.put_i32_le(i32::from(connected));
        self.writer.send(&resp)?;
        Ok(Flow::Continue)
    }

    fn respond_ok_empty(&mut self) -> procproxy_wire::Result<()> {
        let mut resp = BytesMut::new();
        codec::put_status_ok(&mut resp);
        self.writer.send(&resp)
    }

    fn respond_error(&mut self, message: &str) -> procproxy_wire::Result<()> {
        let mut resp = BytesMut::new();
        codec::put_error(&mut resp, message);
        self.writer.send(&resp)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;

    use procproxy_wire::{STATUS_ERROR, STATUS_OK};

    use super::*;

    #[derive(Default)]
    struct ScriptedHost {
        args: Vec<String>,
        env: Vec<String>,
        cwd: String,
        input_script: VecDeque<InputRead>,
        input_data: VecDeque<Vec<u8>>,
        out: Vec<u8>,
        err: Vec<u8>,
        input_closed: bool,
        out_closed: bool,
        err_closed: bool,
        connected: bool,
    }

    impl HostIo for ScriptedHost {
        fn args(&self) -> &[String] {
            &self.args
        }

        fn env_entries(&self) -> Vec<String> {
            self.env.clone()
        }

        fn cwd(&self) -> std::io::Result<String> {
            if self.cwd.is_empty() {
                return Err(std::io::Error::other("cwd unavailable"));
            }
            Ok(self.cwd.clone())
        }

        fn read_input(&mut self, buf: &mut [u8]) -> InputRead {
            match self.input_script.pop_front() {
                Some(InputRead::Data(_)) => {
                    let data = self.input_data.pop_front().unwrap();
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    InputRead::Data(n)
                }
                Some(other) => other,
                None => InputRead::Closed,
            }
        }

        fn input_connected(&mut self) -> bool {
            self.connected
        }

        fn write_output(&mut self, data: &[u8]) -> std::io::Result<()> {
            if self.out_closed {
                return Err(std::io::Error::other("stdout already closed"));
            }
            self.out.extend_from_slice(data);
            Ok(())
        }

        fn write_error(&mut self, data: &[u8]) -> std::io::Result<()> {
            if self.err_closed {
                return Err(std::io::Error::other("stderr already closed"));
            }
            self.err.extend_from_slice(data);
            Ok(())
        }

        fn close_input(&mut self) -> std::io::Result<()> {
            if self.input_closed {
                return Err(std::io::Error::other("stdin already closed"));
            }
            self.input_closed = true;
            Ok(())
        }

        fn close_output(&mut self) -> std::io::Result<()> {
            if self.out_closed {
                return Err(std::io::Error::other("stdout already closed"));
            }
            self.out_closed = true;
            Ok(())
        }

        fn close_error(&mut self) -> std::io::Result<()> {
            if self.err_closed {
                return Err(std::io::Error::other("stderr already closed"));
            }
            self.err_closed = true;
            Ok(())
        }
    }

    fn run_session(requests: &[u8], host: &mut ScriptedHost) -> (Option<i32>, Vec<u8>) {
        let mut session = Session::new(Cursor::new(requests.to_vec()), Vec::new());
        let exit = session.run(host);
        let responses = session.writer.into_inner();
        (exit, responses)
    }

    fn response_reader(bytes: Vec<u8>) -> WireReader<Cursor<Vec<u8>>> {
        WireReader::new(Cursor::new(bytes))
    }

    #[test]
    fn get_args_frames_every_argument() {
        let mut host = ScriptedHost {
            args: vec!["proxy".into(), "arg1".into(), "arg2".into(), "arg3".into()],
            ..ScriptedHost::default()
        };
        let (exit, raw) = run_session(&[Opcode::GetArgs.as_byte()], &mut host);
        assert_eq!(exit, None);

        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_u32().unwrap(), 4);
        let args: Vec<String> = (0..4).map(|_| resp.read_string().unwrap()).collect();
        assert_eq!(args, ["proxy", "arg1", "arg2", "arg3"]);
    }

    #[test]
    fn read_input_trichotomy() {
        let mut host = ScriptedHost {
            input_script: VecDeque::from([
                InputRead::NoData,
                InputRead::Data(5),
                InputRead::Closed,
            ]),
            input_data: VecDeque::from([b"test\n".to_vec()]),
            ..ScriptedHost::default()
        };

        let mut requests = BytesMut::new();
        for _ in 0..3 {
            requests.put_u8(Opcode::ReadInput.as_byte());
            requests.put_u32_le(8192);
        }
        let (_, raw) = run_session(&requests, &mut host);

        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), READ_NO_DATA);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), 5);
        assert_eq!(resp.read_bytes(5).unwrap().as_ref(), b"test\n");
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), READ_CLOSED);
    }

    #[test]
    fn read_input_with_zero_budget_reports_no_data() {
        let mut host = ScriptedHost::default();
        let mut requests = BytesMut::new();
        requests.put_u8(Opcode::ReadInput.as_byte());
        requests.put_u32_le(0);
        let (_, raw) = run_session(&requests, &mut host);

        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), READ_NO_DATA);
    }

    #[test]
    fn write_out_delivers_payload_and_zero_length_is_valid() {
        let mut host = ScriptedHost::default();
        let mut requests = BytesMut::new();
        requests.put_u8(Opcode::WriteOut.as_byte());
        codec::put_lp_bytes(&mut requests, b"hello");
        requests.put_u8(Opcode::WriteOut.as_byte());
        codec::put_lp_bytes(&mut requests, b"");
        let (_, raw) = run_session(&requests, &mut host);

        assert_eq!(host.out, b"hello");
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
    }

    #[test]
    fn payload_bytes_are_not_mistaken_for_opcodes() {
        let mut host = ScriptedHost::default();
        let mut requests = BytesMut::new();
        requests.put_u8(Opcode::WriteOut.as_byte());
        codec::put_lp_bytes(&mut requests, &[Opcode::Exit.as_byte(); 8]);
        let (exit, _) = run_session(&requests, &mut host);
        assert_eq!(exit, None);
        assert_eq!(host.out, [Opcode::Exit.as_byte(); 8]);
    }

    #[test]
    fn write_err_goes_to_the_error_stream() {
        let mut host = ScriptedHost::default();
        let mut requests = BytesMut::new();
        requests.put_u8(Opcode::WriteErr.as_byte());
        codec::put_lp_bytes(&mut requests, b"oops");
        run_session(&requests, &mut host);
        assert_eq!(host.err, b"oops");
        assert!(host.out.is_empty());
    }

    #[test]
    fn double_close_yields_error_with_message() {
        let mut host = ScriptedHost::default();
        let requests = [
            Opcode::CloseInput.as_byte(),
            Opcode::CloseInput.as_byte(),
            Opcode::GetArgs.as_byte(),
        ];
        let (_, raw) = run_session(&requests, &mut host);

        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), STATUS_ERROR);
        let message = resp.read_string().unwrap();
        assert!(!message.is_empty());
        // The loop keeps serving after a per-command error.
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
    }

    #[test]
    fn exit_acknowledges_then_stops() {
        let mut host = ScriptedHost::default();
        let mut requests = BytesMut::new();
        requests.put_u8(Opcode::Exit.as_byte());
        requests.put_i32_le(42);
        // Anything after EXIT must never be served.
        requests.put_u8(Opcode::GetArgs.as_byte());
        let (exit, raw) = run_session(&requests, &mut host);

        assert_eq!(exit, Some(42));
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert!(resp.read_u8().is_err(), "no bytes may follow the EXIT ack");
    }

    #[test]
    fn unknown_opcode_terminates_cleanly() {
        let mut host = ScriptedHost::default();
        let (exit, raw) = run_session(&[0x08, Opcode::GetArgs.as_byte()], &mut host);
        assert_eq!(exit, None);
        assert!(raw.is_empty());
    }

    #[test]
    fn get_cwd_success_and_failure() {
        let mut host = ScriptedHost {
            cwd: "/work/dir".into(),
            ..ScriptedHost::default()
        };
        let (_, raw) = run_session(&[Opcode::GetCwd.as_byte()], &mut host);
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_string().unwrap(), "/work/dir");

        let mut failing = ScriptedHost::default();
        let (_, raw) = run_session(&[Opcode::GetCwd.as_byte()], &mut failing);
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_ERROR);
        assert!(!resp.read_string().unwrap().is_empty());
    }

    #[test]
    fn get_env_transports_entries_verbatim() {
        let mut host = ScriptedHost {
            env: vec!["PATH=/bin".into(), "WEIRD-NO-EQUALS".into()],
            ..ScriptedHost::default()
        };
        let (_, raw) = run_session(&[Opcode::GetEnv.as_byte()], &mut host);
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_u32().unwrap(), 2);
        assert_eq!(resp.read_string().unwrap(), "PATH=/bin");
        assert_eq!(resp.read_string().unwrap(), "WEIRD-NO-EQUALS");
    }

    #[test]
    fn input_connected_is_an_i32_boolean() {
        let mut host = ScriptedHost {
            connected: true,
            ..ScriptedHost::default()
        };
        let (_, raw) = run_session(&[Opcode::IsInputConnected.as_byte()], &mut host);
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), 1);

        host.connected = false;
        let (_, raw) = run_session(&[Opcode::IsInputConnected.as_byte()], &mut host);
        let mut resp = response_reader(raw);
        assert_eq!(resp.read_i32().unwrap(), STATUS_OK);
        assert_eq!(resp.read_i32().unwrap(), 0);
    }
}
