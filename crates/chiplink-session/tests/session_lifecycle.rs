use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chiplink_frame::{BitAddress, BitMatrix, Packet, ACK, PACKET_SIZE};
use chiplink_session::{
    BitBoard, ConnectionSession, ConnectionState, LinkEvent, SessionConfig,
};
use chiplink_transport::{DeviceListener, LinkStream};

fn fast_config() -> SessionConfig {
    SessionConfig {
        io_timeout: Duration::from_millis(200),
        heartbeat_interval: Duration::from_millis(50),
        keepalive_after: Duration::from_millis(150),
        liveness_timeout: Duration::from_millis(600),
        ..SessionConfig::default()
    }
}

fn listener() -> DeviceListener {
    DeviceListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).expect("listener should bind")
}

fn session_with(
    config: SessionConfig,
    board: &BitBoard,
) -> (ConnectionSession, Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel();
    let session = ConnectionSession::new(config, Arc::new(board.clone()), Arc::new(tx));
    (session, rx)
}

fn read_packet(stream: &mut LinkStream) -> Packet {
    let mut raw = [0u8; PACKET_SIZE];
    stream.read_exact(&mut raw).expect("device should read a packet");
    Packet::decode(&raw).expect("packet should decode")
}

fn wait_for(rx: &Receiver<LinkEvent>, timeout: Duration, pred: impl Fn(&LinkEvent) -> bool) -> LinkEvent {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => continue,
            Err(_) => panic!("expected event did not arrive"),
        }
    }
}

fn wait_for_state(session: &ConnectionSession, state: ConnectionState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while session.state() != state {
        if Instant::now() >= deadline {
            panic!("session did not reach {state}");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn connect_sends_current_outputs_and_logs_ack() {
    let listener = listener();
    let port = listener.local_addr().port();
    let board = BitBoard::default();
    board.update(|m| m.set(BitAddress::new(0, 0).unwrap(), true));
    let (session, rx) = session_with(SessionConfig::default(), &board);

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("device should accept");
        let first = read_packet(&mut stream);
        stream.write_all(&[ACK]).expect("device should ack");
        let second = read_packet(&mut stream);
        (first, second)
    });

    session.connect("127.0.0.1", port).expect("connect should succeed");
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.last_active().is_some());

    wait_for(&rx, Duration::from_secs(3), |e| *e == LinkEvent::Ack);

    session
        .send(&BitMatrix::from_chip_bytes([0, 0, 0, 0, 0, 0x80]))
        .expect("send should succeed");

    let (first, second) = device.join().expect("device thread should finish");
    assert_eq!(first.as_bytes()[3], 0x01);
    assert_eq!(first.checksum(), 0x02);
    assert_eq!(second.frame().bytes(), &[0, 0, 0, 0, 0, 0x80]);

    session.disconnect();
    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.last_active().is_none());
}

#[test]
fn second_connect_while_connected_is_rejected() {
    let listener = listener();
    let port = listener.local_addr().port();
    let (session, _rx) = session_with(SessionConfig::default(), &BitBoard::default());

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("device should accept");
        let _ = read_packet(&mut stream);
        stream
    });

    session.connect("127.0.0.1", port).expect("connect should succeed");
    let err = session.connect("127.0.0.1", port).unwrap_err();
    assert!(matches!(
        err,
        chiplink_session::SessionError::AlreadyActive(ConnectionState::Connected)
    ));

    let _stream = device.join().expect("device thread should finish");
    session.disconnect();
}

#[test]
fn peer_close_forces_disconnect_with_warning() {
    let listener = listener();
    let port = listener.local_addr().port();
    let (session, rx) = session_with(fast_config(), &BitBoard::default());

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("device should accept");
        let _ = read_packet(&mut stream);
        drop(stream);
    });

    session.connect("127.0.0.1", port).expect("connect should succeed");
    device.join().expect("device thread should finish");

    let warning = wait_for(&rx, Duration::from_secs(3), |e| {
        matches!(e, LinkEvent::Warning { .. })
    });
    assert!(matches!(warning, LinkEvent::Warning { title, .. } if title == "connection lost"));
    wait_for_state(&session, ConnectionState::Disconnected, Duration::from_secs(1));
}

#[test]
fn silent_device_gets_keepalives_then_times_out() {
    let listener = listener();
    let port = listener.local_addr().port();
    let (session, rx) = session_with(fast_config(), &BitBoard::default());

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("device should accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .expect("timeout should apply");
        let mut packets = 0usize;
        let mut raw = [0u8; PACKET_SIZE];
        while stream.read_exact(&mut raw).is_ok() {
            packets += 1;
        }
        packets
    });

    session.connect("127.0.0.1", port).expect("connect should succeed");

    let warning = wait_for(&rx, Duration::from_secs(3), |e| {
        matches!(e, LinkEvent::Warning { .. })
    });
    assert!(matches!(warning, LinkEvent::Warning { title, .. } if title == "connection timed out"));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let packets = device.join().expect("device thread should finish");
    // The connect packet plus at least one keepalive.
    assert!(packets >= 2, "expected keepalives, got {packets} packets");
}

#[test]
fn acking_device_keeps_link_alive() {
    let listener = listener();
    let port = listener.local_addr().port();
    let config = fast_config();
    let liveness = config.liveness_timeout;
    let (session, _rx) = session_with(config, &BitBoard::default());

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("device should accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .expect("timeout should apply");
        let mut raw = [0u8; PACKET_SIZE];
        while stream.read_exact(&mut raw).is_ok() {
            if stream.write_all(&[ACK]).is_err() {
                break;
            }
        }
    });

    session.connect("127.0.0.1", port).expect("connect should succeed");
    thread::sleep(liveness * 3);
    assert_eq!(session.state(), ConnectionState::Connected);

    session.disconnect();
    device.join().expect("device thread should finish");
}

#[test]
fn reconnect_after_disconnect_uses_fresh_socket() {
    let listener = listener();
    let port = listener.local_addr().port();
    let (session, _rx) = session_with(SessionConfig::default(), &BitBoard::default());

    let device = thread::spawn(move || {
        let mut peers = Vec::new();
        for _ in 0..2 {
            let (mut stream, peer) = listener.accept().expect("device should accept");
            let _ = read_packet(&mut stream);
            peers.push(peer);
        }
        peers
    });

    let first = session.connect("127.0.0.1", port).expect("first connect");
    session.disconnect();
    let second = session.connect("127.0.0.1", port).expect("second connect");
    assert_eq!(first, second);

    let peers = device.join().expect("device thread should finish");
    assert_ne!(peers[0], peers[1], "each connect should use a new local port");
    session.disconnect();
}
