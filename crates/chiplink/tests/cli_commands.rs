#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn chiplink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_chiplink"));
    cmd.env_remove("CHIPLINK_HOST")
        .env_remove("CHIPLINK_PORT")
        .args(["--log-level", "error"]);
    cmd
}

fn free_port(ip: &str) -> u16 {
    let listener = TcpListener::bind((ip, 0)).expect("ephemeral bind should work");
    listener.local_addr().expect("bound address").port()
}

fn spawn_device(bind: SocketAddr, count: usize) -> Child {
    let child = chiplink()
        .args(["--format", "json", "device", "--bind"])
        .arg(bind.to_string())
        .args(["--count", &count.to_string()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("device should start");
    wait_for_listener(bind, Duration::from_secs(5));
    child
}

fn wait_for_listener(addr: SocketAddr, timeout: Duration) {
    let start = Instant::now();
    while TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_err() {
        if start.elapsed() >= timeout {
            panic!("device did not start listening on {addr}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn finish(child: Child, timeout: Duration) -> Output {
    let pid = child.id();
    let watchdog = thread::spawn(move || {
        thread::sleep(timeout);
        let _ = Command::new("kill").arg(pid.to_string()).status();
    });
    let output = child.wait_with_output().expect("child should finish");
    drop(watchdog);
    output
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("stdout should be json lines"))
        .collect()
}

#[test]
fn version_prints_package_version() {
    let output = chiplink().arg("version").output().expect("version should run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("chiplink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn send_with_wait_ack_against_simulated_device() {
    let addr: SocketAddr = format!("127.0.0.1:{}", free_port("127.0.0.1")).parse().unwrap();
    let device = spawn_device(addr, 1);

    let output = chiplink()
        .args(["--format", "json", "send", "127.0.0.1", "--port"])
        .arg(addr.port().to_string())
        .args(["--data", "010000000080", "--wait-ack"])
        .output()
        .expect("send should run");

    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let events = json_lines(&output.stdout);
    assert_eq!(events[0]["type"], "log");
    assert_eq!(
        events[0]["message"],
        "sent AA 55 01 01 00 00 00 00 80 82"
    );
    assert_eq!(events[1]["type"], "ack");

    let device_out = finish(device, Duration::from_secs(10));
    assert!(device_out.status.success());
    let packets = json_lines(&device_out.stdout);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0]["cmd"], 1);
    assert_eq!(packets[0]["set"], serde_json::json!([[0, 0], [5, 7]]));
}

#[test]
fn send_to_closed_port_is_a_transport_error() {
    let port = free_port("127.0.0.1");
    let output = chiplink()
        .args(["send", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .args(["--data", "000000000000", "--timeout", "1s"])
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn send_rejects_short_data() {
    let output = chiplink()
        .args(["send", "127.0.0.1", "--data", "0100"])
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn connect_pushes_operator_changes() {
    let addr: SocketAddr = format!("127.0.0.1:{}", free_port("127.0.0.1")).parse().unwrap();
    let device = spawn_device(addr, 2);

    let mut connect = chiplink()
        .args(["--format", "json", "connect", "127.0.0.1", "--port"])
        .arg(addr.port().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("connect should start");
    {
        let stdin = connect.stdin.as_mut().expect("stdin should be piped");
        stdin
            .write_all(b"set 1 2\nstatus\nquit\n")
            .expect("commands should be written");
    }
    let connect_out = finish(connect, Duration::from_secs(10));
    assert!(
        connect_out.status.success(),
        "connect failed: {}",
        String::from_utf8_lossy(&connect_out.stderr)
    );
    let printed = json_lines(&connect_out.stdout);
    assert!(printed
        .iter()
        .any(|v| v["state"] == "connected" && v["type"] == "state"));
    let status = printed
        .iter()
        .find(|v| v.get("set_count").is_some())
        .expect("status should be printed");
    assert_eq!(status["set_count"], 1);
    assert_eq!(status["chips"][1], "04");

    let device_out = finish(device, Duration::from_secs(10));
    let packets = json_lines(&device_out.stdout);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0]["set"], serde_json::json!([]));
    assert_eq!(packets[1]["set"], serde_json::json!([[1, 2]]));
}

#[cfg(target_os = "linux")]
#[test]
fn scan_finds_device_on_loopback_subnet() {
    let port = free_port("127.0.0.42");
    let addr: SocketAddr = format!("127.0.0.42:{port}").parse().unwrap();
    let device = spawn_device(addr, 1);

    let output = chiplink()
        .args(["--format", "raw", "scan", "--around", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .output()
        .expect("scan should run");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "127.0.0.42");

    let mut device = device;
    let _ = device.kill();
    let _ = device.wait();
}

#[test]
fn scan_of_empty_subnet_exits_not_found() {
    let port = free_port("127.0.0.1");
    let output = chiplink()
        .args(["--format", "json", "scan", "--around", "127.0.0.1", "--timeout", "3s", "--port"])
        .arg(port.to_string())
        .output()
        .expect("scan should run");

    assert_eq!(output.status.code(), Some(4));
    let report = &json_lines(&output.stdout)[0];
    assert_eq!(report["found"], serde_json::Value::Null);
}
