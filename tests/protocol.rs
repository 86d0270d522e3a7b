//! Integration tests driving a real [`Client`] against a loopback
//! listener that plays the simulator's half of the protocol by hand —
//! deliberately not using any of this crate's own wire helpers, so the
//! test exercises the library exactly as an independent peer would.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serial_test::serial;

use ifconnect::{Client, Config, Event, EventKind, Msg, SessionTag, Value};

/// Read a one-shot read request: `[i32 command_id][u8 flag]`, 5 bytes
/// total (spec.md §4.1) — what a peer actually receives for a `get` or
/// the manifest-fetch sentinel.
fn read_request(stream: &mut TcpStream) -> (i32, u8) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).expect("reading request header");
    let command_id = i32::from_le_bytes(header[0..4].try_into().unwrap());
    (command_id, header[4])
}

fn write_frame(stream: &mut TcpStream, command_id: i32, payload: &[u8]) {
    stream.write_all(&command_id.to_le_bytes()).unwrap();
    stream
        .write_all(&(payload.len() as i32).to_le_bytes())
        .unwrap();
    stream.write_all(payload).unwrap();
}

fn encode_string_payload(s: &str) -> Vec<u8> {
    let mut out = (s.len() as i32).to_le_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

#[test]
#[serial]
fn full_round_trip_against_a_hand_written_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (write_seen_tx, write_seen_rx) = mpsc::channel::<Vec<u8>>();
    let (invoke_seen_tx, invoke_seen_rx) = mpsc::channel::<Vec<u8>>();

    let peer = std::thread::spawn(move || {
        // Connection 1: manifest exchange.
        let (mut manifest_conn, _) = listener.accept().unwrap();
        let (id, flag) = read_request(&mut manifest_conn);
        assert_eq!(id, -1);
        assert_eq!(flag, 0);
        let manifest_text =
            "1,2,aircraft/0/alt\n2,4,aircraft/0/callsign\n3,-1,commands/Autopilot.Engage\n";
        write_frame(&mut manifest_conn, -1, &encode_string_payload(manifest_text));
        drop(manifest_conn);

        // Connection 2: command session.
        let (mut command_conn, _) = listener.accept().unwrap();
        command_conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        loop {
            let mut header = [0u8; 4];
            if command_conn.read_exact(&mut header).is_err() {
                break;
            }
            let command_id = i32::from_le_bytes(header);
            let mut flag = [0u8; 1];
            command_conn.read_exact(&mut flag).unwrap();
            if flag[0] == 0 {
                // one-shot read request
                if command_id == 1 {
                    write_frame(&mut command_conn, 1, &1.0f32.to_le_bytes());
                }
            } else {
                match command_id {
                    2 => {
                        let mut len_buf = [0u8; 4];
                        command_conn.read_exact(&mut len_buf).unwrap();
                        let len = i32::from_le_bytes(len_buf) as usize;
                        let mut bytes = vec![0u8; len];
                        command_conn.read_exact(&mut bytes).unwrap();
                        let _ = write_seen_tx.send(bytes);
                    }
                    3 => {
                        let mut n_buf = [0u8; 4];
                        command_conn.read_exact(&mut n_buf).unwrap();
                        let n_args = i32::from_le_bytes(n_buf);
                        let mut raw = Vec::new();
                        for _ in 0..n_args {
                            for _ in 0..2 {
                                let mut len_buf = [0u8; 4];
                                command_conn.read_exact(&mut len_buf).unwrap();
                                let len = i32::from_le_bytes(len_buf) as usize;
                                let mut bytes = vec![0u8; len];
                                command_conn.read_exact(&mut bytes).unwrap();
                                raw.extend_from_slice(&bytes);
                            }
                        }
                        let _ = invoke_seen_tx.send(raw);
                        return; // test is done with the command session
                    }
                    _ => {}
                }
            }
        }
    });

    let mut config = Config::default();
    config.host = Some("127.0.0.1".to_string());
    config.port = Some(port);
    config.reconnect_enabled = false;
    config.poll_throttle = Duration::from_millis(20);

    let (ready_tx, ready_rx) = mpsc::channel();
    let client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });
    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("engine never reported readiness")
        .expect("startup failed");

    let (get_tx, get_rx) = mpsc::channel();
    client
        .get(
            "aircraft/0/alt",
            Some(Box::new(move |data| {
                let _ = get_tx.send(data.data);
            })),
        )
        .expect("get should be accepted while ready");
    let value = get_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, Value::Float(1.0));

    client
        .set("aircraft/0/callsign", Value::String("NINJA".to_string()))
        .expect("set should be accepted");
    let written = write_seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(written, b"NINJA");

    client
        .run(
            "commands/Autopilot.Engage",
            vec![("heading".to_string(), "270".to_string())],
        )
        .expect("run should be accepted");
    let invoked = invoke_seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(invoked, b"heading270");

    peer.join().unwrap();

    let (closed_tx, closed_rx) = mpsc::channel();
    client.close(move || {
        let _ = closed_tx.send(());
    });
    closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
#[serial]
fn unknown_manifest_name_is_rejected_without_touching_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer = std::thread::spawn(move || {
        let (mut manifest_conn, _) = listener.accept().unwrap();
        let (id, flag) = read_request(&mut manifest_conn);
        assert_eq!(id, -1);
        assert_eq!(flag, 0);
        write_frame(
            &mut manifest_conn,
            -1,
            &encode_string_payload("1,2,aircraft/0/alt\n"),
        );
        drop(manifest_conn);
        let _command_conn = listener.accept().unwrap();
        let _poll_conn = listener.accept().unwrap();
        // Sessions stay open for the rest of the test; dropped at thread exit.
        std::thread::sleep(Duration::from_millis(500));
    });

    let mut config = Config::default();
    config.host = Some("127.0.0.1".to_string());
    config.port = Some(port);
    config.reconnect_enabled = false;

    let (ready_tx, ready_rx) = mpsc::channel();
    let client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });
    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("engine never reported readiness")
        .expect("startup failed");

    let err = client
        .get("aircraft/0/nonexistent", None)
        .expect_err("unknown manifest name must be rejected");
    assert!(matches!(err, ifconnect::Error::UnknownCommand(_)));

    let (closed_tx, closed_rx) = mpsc::channel();
    client.close(move || {
        let _ = closed_tx.send(());
    });
    closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    peer.join().unwrap();
}

#[test]
#[serial]
fn manifest_accessor_reflects_the_loaded_catalog() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer = std::thread::spawn(move || {
        let (mut manifest_conn, _) = listener.accept().unwrap();
        let (id, flag) = read_request(&mut manifest_conn);
        assert_eq!(id, -1);
        assert_eq!(flag, 0);
        write_frame(
            &mut manifest_conn,
            -1,
            &encode_string_payload("1,2,aircraft/0/alt\n"),
        );
        drop(manifest_conn);
        let (mut command_conn, _) = listener.accept().unwrap();
        let _poll_conn = listener.accept().unwrap();
        let (id, flag) = read_request(&mut command_conn);
        assert_eq!(id, 1);
        assert_eq!(flag, 0);
        write_frame(&mut command_conn, 1, &1.0f32.to_le_bytes());
        std::thread::sleep(Duration::from_millis(200));
    });

    let mut config = Config::default();
    config.host = Some("127.0.0.1".to_string());
    config.port = Some(port);
    config.reconnect_enabled = false;

    let (ready_tx, ready_rx) = mpsc::channel();
    let client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });
    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("engine never reported readiness")
        .expect("startup failed");

    assert_eq!(client.manifest().len(), 1);

    let (get_tx, get_rx) = mpsc::channel();
    client
        .get(
            "aircraft/0/alt",
            Some(Box::new(move |data| {
                let _ = get_tx.send(data.data);
            })),
        )
        .unwrap();
    get_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let (closed_tx, closed_rx) = mpsc::channel();
    client.close(move || {
        let _ = closed_tx.send(());
    });
    closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    peer.join().unwrap();
}

#[test]
#[serial]
fn startup_fails_when_manifest_never_arrives() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer = std::thread::spawn(move || {
        // Accept the manifest connection but never answer it.
        let (_conn, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(300));
    });

    let mut config = Config::default();
    config.host = Some("127.0.0.1".to_string());
    config.port = Some(port);
    config.manifest_timeout = Duration::from_millis(100);

    let (ready_tx, ready_rx) = mpsc::channel();
    let _client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });
    let outcome = ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("engine never reported readiness");
    assert!(outcome.is_err());

    peer.join().unwrap();
}

#[test]
#[serial]
fn zero_throttle_dispatches_the_next_poll_without_waiting_for_the_ticker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    const ROUNDS: u32 = 8;

    let peer = std::thread::spawn(move || {
        let (mut manifest_conn, _) = listener.accept().unwrap();
        let (id, flag) = read_request(&mut manifest_conn);
        assert_eq!(id, -1);
        assert_eq!(flag, 0);
        write_frame(
            &mut manifest_conn,
            -1,
            &encode_string_payload("1,2,aircraft/0/alt\n"),
        );
        drop(manifest_conn);

        let (_command_conn, _) = listener.accept().unwrap();
        let (mut poll_conn, _) = listener.accept().unwrap();
        poll_conn
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        for i in 0..ROUNDS {
            let (id, flag) = read_request(&mut poll_conn);
            assert_eq!(id, 1);
            assert_eq!(flag, 0);
            write_frame(&mut poll_conn, 1, &(i as f32).to_le_bytes());
        }
        std::thread::sleep(Duration::from_millis(200));
    });

    let mut config = Config::default();
    config.host = Some("127.0.0.1".to_string());
    config.port = Some(port);
    config.reconnect_enabled = false;
    config.poll_throttle = Duration::ZERO;

    let (ready_tx, ready_rx) = mpsc::channel();
    let client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });
    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("engine never reported readiness")
        .expect("startup failed");

    let (poll_tx, poll_rx) = mpsc::channel();
    client
        .poll_register(
            "aircraft/0/alt",
            Some(Box::new(move |data| {
                let _ = poll_tx.send(data.data);
            })),
        )
        .expect("poll_register should be accepted while ready");

    let start = Instant::now();
    for i in 0..ROUNDS {
        let value = poll_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("poll round {i} never arrived"));
        assert_eq!(value, Value::Float(i as f32));
    }
    let elapsed = start.elapsed();
    // The 250 ms ticker alone would take at least ROUNDS * 250ms; a zero
    // throttle dispatching off the demux completion instead should clear
    // all rounds well inside a single tick interval's worth of slack.
    assert!(
        elapsed < Duration::from_millis(250),
        "poll rounds took {elapsed:?}, looks throttled to the ticker cadence"
    );

    peer.join().unwrap();

    let (closed_tx, closed_rx) = mpsc::channel();
    client.close(move || {
        let _ = closed_tx.send(());
    });
    closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
#[serial]
fn command_session_timeout_triggers_reconnect_when_enabled() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (reconnect_tx, reconnect_rx) = mpsc::channel::<()>();

    let peer = std::thread::spawn(move || {
        let (mut manifest_conn, _) = listener.accept().unwrap();
        let (id, flag) = read_request(&mut manifest_conn);
        assert_eq!(id, -1);
        assert_eq!(flag, 0);
        write_frame(
            &mut manifest_conn,
            -1,
            &encode_string_payload("1,2,aircraft/0/alt\n"),
        );
        drop(manifest_conn);

        // Neither session is ever written to: both reader threads should
        // time out and the command session's timeout should force a
        // reconnect. Keep accepting afterwards (without replying) so the
        // reconnect attempt succeeds instead of retrying against a closed
        // listener forever.
        let _command_conn = listener.accept().unwrap();
        let _poll_conn = listener.accept().unwrap();

        listener.set_nonblocking(true).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut signaled = false;
        while Instant::now() < deadline {
            match listener.accept() {
                Ok(_conn) => {
                    if !signaled {
                        let _ = reconnect_tx.send(());
                        signaled = true;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        }
    });

    let mut config = Config::default();
    config.host = Some("127.0.0.1".to_string());
    config.port = Some(port);
    config.reconnect_enabled = true;
    config.timeout = Duration::from_millis(50);

    let (ready_tx, ready_rx) = mpsc::channel();
    let client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });
    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("engine never reported readiness")
        .expect("startup failed");

    let (msg_tx, msg_rx) = mpsc::channel();
    client.on(
        EventKind::Msg,
        Box::new(move |event| {
            let _ = msg_tx.send(event);
        }),
    );

    reconnect_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("a session never reconnected after timing out");

    let mut saw_command_reconnecting = false;
    while let Ok(event) = msg_rx.recv_timeout(Duration::from_millis(500)) {
        if let Event::Msg(Msg::Reconnecting {
            session: SessionTag::Command,
        }) = event
        {
            saw_command_reconnecting = true;
            break;
        }
    }
    assert!(
        saw_command_reconnecting,
        "expected a Reconnecting lifecycle event for the command session after its read timed out"
    );

    let (closed_tx, closed_rx) = mpsc::channel();
    client.close(move || {
        let _ = closed_tx.send(());
    });
    closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    peer.join().unwrap();
}
