#![cfg(unix)]

use std::io::Write;
use std::net::{Ipv4Addr, TcpStream};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use procproxy_wire::encode_handshake;

#[test]
fn version_prints_the_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_procproxy"))
        .arg("version")
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn extended_version_names_the_protocol() {
    let output = Command::new(env!("CARGO_BIN_EXE_procproxy"))
        .args(["version", "--extended"])
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ProcessProxy 0001"));
}

#[test]
fn targets_lists_all_seven_platforms_as_json() {
    let output = Command::new(env!("CARGO_BIN_EXE_procproxy"))
        .args(["--format", "json", "targets"])
        .output()
        .expect("targets command should run");
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("targets output should be JSON");
    let list = parsed.as_array().expect("targets output should be a list");
    assert_eq!(list.len(), 7);
    assert!(list
        .iter()
        .any(|t| t["binary"] == "procproxy-endpoint-win32-ia32.exe"));
}

#[test]
fn targets_resolves_paths_under_a_root() {
    let output = Command::new(env!("CARGO_BIN_EXE_procproxy"))
        .args(["--format", "json", "targets", "--root", "/opt/proxies"])
        .output()
        .expect("targets command should run");
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for target in parsed.as_array().unwrap() {
        let path = target["path"].as_str().expect("path should be present");
        assert!(path.starts_with("/opt/proxies/"));
    }
}

#[test]
fn listen_serves_one_scripted_endpoint() {
    // An ephemeral port chosen by binding and releasing; the races this
    // invites are tolerable for a loopback regression test.
    let port = {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    };

    let child = Command::new(env!("CARGO_BIN_EXE_procproxy"))
        .args([
            "--format",
            "json",
            "--log-level",
            "error",
            "listen",
            "--port",
            &port.to_string(),
            "--count",
            "1",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen command should start");

    let stream = connect_with_retry(port, Duration::from_secs(3));
    let endpoint = thread::spawn(move || {
        let mut stream = stream;
        stream.write_all(&encode_handshake(b"cli-token")).unwrap();
        let mut reader = procproxy_wire::WireReader::new(stream.try_clone().unwrap());
        let mut writer = procproxy_wire::WireWriter::new(stream);

        // GET_ARGS
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        let mut resp = bytes::BytesMut::new();
        procproxy_wire::put_status_ok(&mut resp);
        bytes::BufMut::put_u32_le(&mut resp, 1);
        procproxy_wire::put_lp_str(&mut resp, "scripted");
        writer.send(&resp).unwrap();

        // GET_CWD
        assert_eq!(reader.read_u8().unwrap(), 0x05);
        let mut resp = bytes::BytesMut::new();
        procproxy_wire::put_status_ok(&mut resp);
        procproxy_wire::put_lp_str(&mut resp, "/scripted/cwd");
        writer.send(&resp).unwrap();

        // GET_ENV
        assert_eq!(reader.read_u8().unwrap(), 0x06);
        let mut resp = bytes::BytesMut::new();
        procproxy_wire::put_status_ok(&mut resp);
        bytes::BufMut::put_u32_le(&mut resp, 1);
        procproxy_wire::put_lp_str(&mut resp, "A=1");
        writer.send(&resp).unwrap();
    });

    endpoint.join().unwrap();
    let output = child.wait_with_output().expect("listen should finish");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/scripted/cwd"));
    assert!(
        !stdout.contains("cli-token"),
        "tokens must never be printed verbatim"
    );
}

fn connect_with_retry(port: u16, timeout: Duration) -> TcpStream {
    let start = Instant::now();
    loop {
        match TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
            Ok(stream) => return stream,
            Err(err) => {
                if start.elapsed() >= timeout {
                    panic!("connect timeout: {err}");
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}
