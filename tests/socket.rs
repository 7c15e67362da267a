mod common;

use std::thread;

use common::{closed_port, connected_pair, listener, port_of, LOCALHOST};
use nix::errno::Errno;
use pollsock::{AsPoller, Error, Events, Family, MsgFlags, Poller, Socket, State, BUF_SIZE};

#[test]
fn ping_reaches_server() {
    let (mut listener, port) = listener();
    assert_eq!(listener.state(), State::Listening);

    let mut client = Socket::new(1, true, Family::Inet).unwrap();
    client.connect(LOCALHOST, port, None).unwrap();
    assert_eq!(client.state(), State::Connected);

    let mut server = listener.accept(2, true).unwrap();
    assert_eq!(server.state(), State::Connected);
    assert_eq!(server.handle().tag(), 2);

    assert_eq!(client.send(b"ping", MsgFlags::empty()).unwrap(), 4);
    let mut buf = [0u8; 16];
    let n = server.recv(&mut buf, MsgFlags::empty()).unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf[..n], b"ping");

    client.term().unwrap();
    server.term().unwrap();
    listener.term().unwrap();
}

#[test]
fn large_payload_round_trip() {
    let (mut client, mut server) = connected_pair();
    let payload: Vec<u8> = (0..BUF_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let sender = thread::spawn(move || {
        let mut sent = 0;
        while sent < payload.len() {
            sent += client.send(&payload[sent..], MsgFlags::empty()).unwrap();
        }
        client
    });

    let mut received = Vec::with_capacity(expected.len());
    let mut buf = vec![0u8; BUF_SIZE];
    while received.len() < expected.len() {
        let n = server.recv(&mut buf, MsgFlags::empty()).unwrap();
        assert!(n > 0, "peer closed early");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, expected);

    sender.join().unwrap().term().unwrap();
    server.term().unwrap();
}

#[test]
fn every_payload_size_survives() {
    let (mut client, mut server) = connected_pair();
    let mut buf = [0u8; 64];
    for len in 1..=64usize {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
        let mut sent = 0;
        while sent < len {
            sent += client.send(&payload[sent..], MsgFlags::empty()).unwrap();
        }
        let mut received = Vec::new();
        while received.len() < len {
            let n = server
                .recv(&mut buf[..len - received.len()], MsgFlags::empty())
                .unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, payload);
    }
}

#[test]
fn peer_shutdown_reads_zero() {
    let (client, mut server) = connected_pair();
    client.term().unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(server.recv(&mut buf, MsgFlags::empty()).unwrap(), 0);
}

#[test]
fn nonblocking_connect_to_closed_port_fails() {
    let port = closed_port();
    let mut client = Socket::new(1, false, Family::Inet).unwrap();

    match client.connect(LOCALHOST, port, None) {
        Err(Error::WantWrite) => {
            assert_eq!(client.state(), State::Connecting);
            let mut poller = Poller::new().unwrap();
            poller.add(client.handle_mut(), Events::WRITE, 7).unwrap();

            let reported = common::wait_until(&mut poller, 50, |data, events| {
                assert_eq!(data, 7);
                events.is_writable()
            });
            assert!(reported, "connect never completed");

            let err = client.finish_connect().unwrap_err();
            assert!(matches!(err, Error::Connect(_)), "{err:?}");
            assert_eq!(err.code(), Error::CODE_ERROR);
            assert!(!client.error().is_empty());

            poller.del(client.handle_mut(), Events::WRITE, 7).unwrap();
            poller.term().unwrap();
        }
        // Some stacks refuse loopback connects synchronously.
        Err(Error::Connect(errno)) => assert_eq!(errno, Errno::ECONNREFUSED),
        other => panic!("unexpected connect result {other:?}"),
    }
}

#[test]
fn nonblocking_connect_completes() {
    let (mut listener, port) = listener();
    let mut client = Socket::new(1, false, Family::Inet).unwrap();

    match client.connect(LOCALHOST, port, None) {
        Ok(()) => {}
        Err(Error::WantWrite) => {
            let mut poller = Poller::new().unwrap();
            poller.add(client.handle_mut(), Events::WRITE, 1).unwrap();
            assert!(common::wait_until(&mut poller, 50, |_, events| events
                .is_writable()));
            client.finish_connect().unwrap();
            poller.del(client.handle_mut(), Events::WRITE, 1).unwrap();
        }
        Err(e) => panic!("connect failed: {e}"),
    }
    assert_eq!(client.state(), State::Connected);

    let server = listener.accept(2, true).unwrap();
    assert_eq!(client.remote_addr_string(), format!("{LOCALHOST}:{port}"));
    assert_eq!(server.remote_addr_string(), client.local_addr_string());
}

#[test]
fn nonblocking_accept_and_recv_want_read() {
    let (mut listener, port) = listener();
    listener.set_blocking(false).unwrap();
    assert!(!listener.is_blocking());

    let err = listener.accept(2, false).unwrap_err();
    assert_eq!(err, Error::WantRead);
    assert_eq!(err.code(), Error::CODE_WANT_READ);

    let mut client = Socket::new(1, true, Family::Inet).unwrap();
    client.connect(LOCALHOST, port, None).unwrap();

    let mut poller = Poller::new().unwrap();
    poller.add(listener.handle_mut(), Events::READ, 0).unwrap();
    assert!(common::wait_until(&mut poller, 50, |_, events| events
        .is_readable()));

    let mut server = listener.accept(2, false).unwrap();
    assert!(!server.is_blocking());
    let mut buf = [0u8; 4];
    assert_eq!(
        server.recv(&mut buf, MsgFlags::empty()),
        Err(Error::WantRead)
    );

    poller.del(listener.handle_mut(), Events::READ, 0).unwrap();
    poller.term().unwrap();
}

#[test]
fn recv_timeout_expires() {
    let (_client, mut server) = connected_pair();
    server.set_recv_timeout(50).unwrap();
    server.set_send_timeout(50).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(
        server.recv(&mut buf, MsgFlags::empty()),
        Err(Error::WantRead)
    );
}

#[test]
fn send_to_closed_peer_is_an_error() {
    let (mut client, server) = connected_pair();
    server.term().unwrap();

    let chunk = [0u8; 1024];
    let mut failed = None;
    for _ in 0..1000 {
        match client.send(&chunk, MsgFlags::empty()) {
            Ok(_) => continue,
            Err(e) => {
                failed = Some(e);
                break;
            }
        }
    }
    let err = failed.expect("send never failed");
    assert!(matches!(err, Error::Io(_)), "{err:?}");
    assert!(client.error().starts_with("send: "));
}

#[test]
fn address_strings() {
    let (client, server) = connected_pair();
    let port = port_of(&server);

    assert_eq!(client.remote_addr_string(), format!("{LOCALHOST}:{port}"));
    let described = client.describe();
    assert!(described.starts_with("Local(127.0.0.1:"), "{described}");
    assert!(
        described.ends_with(&format!("), Remote(127.0.0.1:{port})")),
        "{described}"
    );
    assert_eq!(described, client.to_string());

    let fresh = Socket::new(0, true, Family::Inet).unwrap();
    assert_eq!(fresh.remote_addr_string(), "-");
    assert_eq!(fresh.state(), State::Open);
}

#[test]
fn listen_rejects_wrong_family() {
    let mut sock = Socket::new(0, true, Family::Inet).unwrap();
    assert_eq!(sock.listen("::1", 0), Err(Error::Resolve));
    assert!(sock.error().starts_with("listen: "));
}

#[test]
fn listen_on_busy_port_fails() {
    let (_listener, port) = listener();
    let mut second = Socket::new(0, true, Family::Inet).unwrap();
    assert_eq!(
        second.listen(LOCALHOST, port),
        Err(Error::Bind(Errno::EADDRINUSE))
    );
    assert!(second.error().starts_with("bind: "));
}

#[test]
fn connect_from_fixed_source() {
    let (mut listener, port) = listener();
    let mut client = Socket::new(1, true, Family::Inet).unwrap();
    client
        .connect(LOCALHOST, port, Some((LOCALHOST, 0)))
        .unwrap();

    let server = listener.accept(2, true).unwrap();
    assert_eq!(server.remote_addr_string(), client.local_addr_string());
}

#[test]
fn ipv6_loopback_round_trip() {
    let mut listener = match Socket::new(0, true, Family::Inet6) {
        Ok(sock) => sock,
        Err(_) => return,
    };
    if listener.listen("::1", 0).is_err() {
        // No IPv6 loopback on this host.
        return;
    }
    let port = port_of(&listener);
    assert_eq!(listener.local_addr_string(), format!("::1:{port}"));

    let mut client = Socket::new(1, true, Family::Inet6).unwrap();
    client.connect("::1", port, None).unwrap();
    let mut server = listener.accept(2, true).unwrap();

    client.send(b"v6", MsgFlags::empty()).unwrap();
    let mut buf = [0u8; 2];
    let n = server.recv(&mut buf, MsgFlags::empty()).unwrap();
    assert_eq!(&buf[..n], b"v6");
}

#[test]
fn unix_domain_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pollsock.sock");
    let path = path.to_str().unwrap();

    let mut listener = Socket::new(0, true, Family::Unix).unwrap();
    listener.listen(path, 0).unwrap();
    assert_eq!(listener.local_addr_string(), path);

    let mut client = Socket::new(1, true, Family::Unix).unwrap();
    client.connect(path, 0, None).unwrap();
    let mut server = listener.accept(2, true).unwrap();
    assert_eq!(server.family(), Family::Unix);

    client.send(b"ping", MsgFlags::empty()).unwrap();
    let mut buf = [0u8; 4];
    let n = server.recv(&mut buf, MsgFlags::empty()).unwrap();
    assert_eq!(&buf[..n], b"ping");

    // A stale socket file does not stop a new listener.
    listener.term().unwrap();
    let mut again = Socket::new(0, true, Family::Unix).unwrap();
    again.listen(path, 0).unwrap();
}
