mod common;

use std::thread;
use std::time::{Duration, Instant};

use pollsock::{AsPoller, Events, Pipe, Poller};

#[test]
fn write_then_read() {
    let pipe = Pipe::new(9).unwrap();
    assert_eq!(pipe.handle().tag(), 9);

    assert_eq!(pipe.write(b"x").unwrap(), 1);
    let mut buf = [0u8; 1];
    assert_eq!(pipe.read(&mut buf).unwrap(), 1);
    assert_eq!(&buf, b"x");
    assert!(pipe.error().is_empty());

    pipe.term().unwrap();
}

#[test]
fn wakes_a_blocked_wait() {
    let mut pipe = Pipe::new(1).unwrap();
    let mut poller = Poller::new().unwrap();
    poller.add(pipe.handle_mut(), Events::READ, 42).unwrap();

    let started = Instant::now();
    let n = thread::scope(|s| {
        let pipe = &pipe;
        s.spawn(move || {
            thread::sleep(Duration::from_millis(100));
            pipe.write(&[1]).unwrap();
        });
        poller.wait(5000).unwrap()
    });
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(n, 1);
    assert_eq!(poller.data(0), 42);
    assert!(poller.event(0).is_readable());

    let mut token = [0u8; 1];
    assert_eq!(pipe.read(&mut token).unwrap(), 1);
    assert_eq!(token, [1]);

    // The single byte is gone, so nothing is reported any more.
    assert_eq!(poller.wait(0).unwrap(), 0);

    poller.del(pipe.handle_mut(), Events::READ, 42).unwrap();
    poller.term().unwrap();
    pipe.term().unwrap();
}

#[test]
fn shares_a_poller_with_sockets() {
    let mut pipe = Pipe::new(1).unwrap();
    let (_client, mut server) = common::connected_pair();
    let mut poller = Poller::new().unwrap();
    poller.add(pipe.handle_mut(), Events::READ, 1).unwrap();
    poller.add(server.handle_mut(), Events::READ, 2).unwrap();

    pipe.write(b"w").unwrap();
    let n = poller.wait(1000).unwrap();
    assert_eq!(n, 1);
    assert_eq!(poller.data(0), 1);
}
