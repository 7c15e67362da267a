#![allow(dead_code)]

use pollsock::{AsPoller, Events, Family, Socket};

pub const LOCALHOST: &str = "127.0.0.1";

pub fn port_of(sock: &Socket) -> u16 {
    let local = sock.local_addr_string();
    local
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or_else(|| panic!("no port in {local:?}"))
}

/// A blocking IPv4 listener on an ephemeral loopback port.
pub fn listener() -> (Socket, u16) {
    let mut listener = Socket::new(0, true, Family::Inet).expect("socket");
    listener.listen(LOCALHOST, 0).expect("listen");
    let port = port_of(&listener);
    (listener, port)
}

/// Returns `(client, server)`, both blocking and connected to each other.
pub fn connected_pair() -> (Socket, Socket) {
    let (mut listener, port) = listener();
    let mut client = Socket::new(1, true, Family::Inet).expect("socket");
    client.connect(LOCALHOST, port, None).expect("connect");
    let server = listener.accept(2, true).expect("accept");
    listener.term().expect("term listener");
    (client, server)
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let (listener, port) = listener();
    listener.term().expect("term listener");
    port
}

/// Wait repeatedly until `done` is satisfied or the attempts run out,
/// handing every `(data, events)` result to `seen`.
pub fn wait_until<P, F>(poller: &mut P, attempts: usize, mut seen: F) -> bool
where
    P: AsPoller,
    F: FnMut(usize, Events) -> bool,
{
    for _ in 0..attempts {
        let n = poller.wait(100).expect("wait");
        let mut done = false;
        for i in 0..n {
            done |= seen(poller.data(i), poller.event(i));
        }
        if done {
            return true;
        }
    }
    false
}
