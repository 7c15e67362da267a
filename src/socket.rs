//! Stream sockets over IPv4, IPv6 and Unix-domain addresses.
//!
//! A [`Socket`] owns exactly one descriptor. Blocking mode is applied at
//! creation and can be flipped later. Non-blocking sockets never fail with
//! "would block": they return [`Error::WantRead`] or [`Error::WantWrite`]
//! and the caller retries once a poller reports the matching readiness.
//!
//! Connecting a non-blocking socket is a two step affair: [`Socket::connect`]
//! returns `WantWrite` while the handshake is in flight, the caller registers
//! the handle for `WRITE` and calls [`Socket::finish_connect`] once it fires.
use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, MsgFlags, SockFlag, SockType, SockaddrLike,
    SockaddrStorage, UnixAddr,
};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::unistd;
use tracing::debug;

use crate::error::{record, ErrBuf, Error, Result};
use crate::fd::{set_fd_blocking, set_fd_cloexec, set_fd_nosigpipe};
use crate::handle::Handle;

/// Suggested size for a single send/recv buffer.
pub const BUF_SIZE: usize = 32768;

const NO_ADDR: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Inet,
    Inet6,
    Unix,
}

impl Family {
    fn address_family(self) -> AddressFamily {
        match self {
            Family::Inet => AddressFamily::Inet,
            Family::Inet6 => AddressFamily::Inet6,
            Family::Unix => AddressFamily::Unix,
        }
    }

    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Family::Inet => addr.is_ipv4(),
            Family::Inet6 => addr.is_ipv6(),
            Family::Unix => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Descriptor allocated, no network identity yet.
    Open,
    /// Bound to a source address ahead of a connect.
    Bound,
    Listening,
    /// Non-blocking connect in flight.
    Connecting,
    Connected,
}

#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
    handle: Handle,
    blocking: bool,
    family: Family,
    state: State,
    err: ErrBuf,
}

impl Socket {
    pub fn new(tag: i32, blocking: bool, family: Family) -> Result<Self> {
        let fd = socket::socket(
            family.address_family(),
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .map_err(Error::Resource)?;
        set_fd_cloexec(fd.as_raw_fd()).map_err(Error::Resource)?;
        set_fd_blocking(fd.as_raw_fd(), blocking).map_err(Error::Resource)?;
        set_fd_nosigpipe(fd.as_raw_fd()).map_err(Error::Resource)?;

        let handle = Handle::new(fd.as_raw_fd(), tag);
        Ok(Self {
            fd,
            handle,
            blocking,
            family,
            state: State::Open,
            err: ErrBuf::new(),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Last failure recorded on this socket.
    pub fn error(&self) -> &str {
        self.err.as_str()
    }

    fn fail(&mut self, op: &str, err: Error) -> Error {
        record(&mut self.err, op, err)
    }

    fn resolve(&mut self, op: &str, host: &str, port: u16) -> Result<SocketAddr> {
        let family = self.family;
        let found = match (host, port).to_socket_addrs() {
            Ok(mut addrs) => addrs.find(|addr| family.accepts(addr)),
            Err(e) => {
                self.err.set(format_args!("{op}: {host}:{port}: {e}"));
                debug!(op, host, port, error = %e, "resolution failed");
                return Err(Error::Resolve);
            }
        };
        found.ok_or_else(|| {
            self.err
                .set(format_args!("{op}: no {family:?} address for {host}:{port}"));
            Error::Resolve
        })
    }

    fn unix_addr(&mut self, op: &str, path: &str) -> Result<UnixAddr> {
        UnixAddr::new(path).map_err(|e| {
            self.err.set(format_args!("{op}: {path}: {}", e.desc()));
            Error::Resolve
        })
    }

    fn bind_to(&mut self, addr: &dyn SockaddrLike) -> Result<()> {
        socket::bind(self.fd.as_raw_fd(), addr).map_err(|e| self.fail("bind", Error::Bind(e)))
    }

    fn set_nodelay(&mut self) -> Result<()> {
        if self.family == Family::Unix {
            return Ok(());
        }
        socket::setsockopt(&self.fd, sockopt::TcpNoDelay, &true)
            .map_err(|e| self.fail("setsockopt(TCP_NODELAY)", Error::Io(e)))
    }

    /// Bind to `host:port` and start listening. For Unix sockets `host` is
    /// the socket path and `port` is ignored; a stale file at the path is
    /// removed first.
    pub fn listen(&mut self, host: &str, port: u16) -> Result<()> {
        match self.family {
            Family::Unix => {
                let addr = self.unix_addr("listen", host)?;
                match unistd::unlink(host) {
                    Ok(()) | Err(Errno::ENOENT) => {}
                    Err(e) => return Err(self.fail("unlink", Error::Bind(e))),
                }
                self.bind_to(&addr)?;
            }
            Family::Inet | Family::Inet6 => {
                let addr = self.resolve("listen", host, port)?;
                socket::setsockopt(&self.fd, sockopt::ReuseAddr, &true)
                    .map_err(|e| self.fail("setsockopt(SO_REUSEADDR)", Error::Bind(e)))?;
                self.bind_to(&SockaddrStorage::from(addr))?;
            }
        }

        socket::listen(&self.fd, Backlog::MAXCONN)
            .map_err(|e| self.fail("listen", Error::Listen(e)))?;
        self.state = State::Listening;
        debug!(fd = self.fd.as_raw_fd(), local = %self.local_addr_string(), "listening");
        Ok(())
    }

    /// Accept one pending connection as a new socket. The caller picks the
    /// blocking mode of the new socket; nothing is inherited from `self`.
    pub fn accept(&mut self, tag: i32, blocking: bool) -> Result<Socket> {
        let raw = loop {
            match socket::accept(self.fd.as_raw_fd()) {
                Ok(raw) => break raw,
                Err(Errno::EINTR) => continue,
                Err(e) if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => {
                    return Err(Error::WantRead)
                }
                Err(e) => return Err(self.fail("accept", Error::Accept(e))),
            }
        };
        // SAFETY: accept(2) just handed us this descriptor and nothing else
        // refers to it.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        set_fd_cloexec(raw)
            .and_then(|_| set_fd_blocking(raw, blocking))
            .and_then(|_| set_fd_nosigpipe(raw))
            .map_err(|e| self.fail("accept", Error::Accept(e)))?;

        let mut conn = Socket {
            fd,
            handle: Handle::new(raw, tag),
            blocking,
            family: self.family,
            state: State::Connected,
            err: ErrBuf::new(),
        };
        if let Err(e) = conn.set_nodelay() {
            return Err(self.fail("accept", e));
        }
        debug!(fd = raw, peer = %conn, "accepted");
        Ok(conn)
    }

    /// Connect to `dest_host:dest_port`, optionally from a fixed local
    /// address. Unix sockets take the destination path in `dest_host`.
    ///
    /// A non-blocking socket whose handshake cannot finish right away returns
    /// [`Error::WantWrite`] and moves to [`State::Connecting`].
    pub fn connect(
        &mut self,
        dest_host: &str,
        dest_port: u16,
        source: Option<(&str, u16)>,
    ) -> Result<()> {
        match self.family {
            Family::Unix => {
                if let Some((path, _)) = source {
                    let addr = self.unix_addr("bind", path)?;
                    self.bind_to(&addr)?;
                    self.state = State::Bound;
                }
                let addr = self.unix_addr("connect", dest_host)?;
                self.connect_to(&addr)
            }
            Family::Inet | Family::Inet6 => {
                if let Some((host, port)) = source {
                    let addr = self.resolve("bind", host, port)?;
                    socket::setsockopt(&self.fd, sockopt::ReuseAddr, &true)
                        .map_err(|e| self.fail("setsockopt(SO_REUSEADDR)", Error::Bind(e)))?;
                    self.bind_to(&SockaddrStorage::from(addr))?;
                    self.state = State::Bound;
                }
                let addr = self.resolve("connect", dest_host, dest_port)?;
                self.set_nodelay()?;
                self.connect_to(&SockaddrStorage::from(addr))
            }
        }
    }

    fn connect_to(&mut self, addr: &dyn SockaddrLike) -> Result<()> {
        match socket::connect(self.fd.as_raw_fd(), addr) {
            Ok(()) => {
                self.state = State::Connected;
                debug!(fd = self.fd.as_raw_fd(), peer = %self, "connected");
                Ok(())
            }
            // An interrupted connect keeps going in the background, exactly
            // like one that is in progress.
            Err(Errno::EINPROGRESS) | Err(Errno::EINTR) => {
                self.state = State::Connecting;
                debug!(fd = self.fd.as_raw_fd(), "connect in progress");
                Err(Error::WantWrite)
            }
            Err(e) => Err(self.fail("connect", Error::Connect(e))),
        }
    }

    /// Complete a non-blocking connect once the handle reported writable.
    pub fn finish_connect(&mut self) -> Result<()> {
        let pending = socket::getsockopt(&self.fd, sockopt::SocketError)
            .map_err(|e| self.fail("getsockopt(SO_ERROR)", Error::Connect(e)))?;
        if pending != 0 {
            return Err(self.fail("connect", Error::Connect(Errno::from_raw(pending))));
        }
        self.state = State::Connected;
        debug!(fd = self.fd.as_raw_fd(), peer = %self, "connected");
        Ok(())
    }

    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        set_fd_blocking(self.fd.as_raw_fd(), blocking)
            .map_err(|e| self.fail("fcntl", Error::Io(e)))?;
        self.blocking = blocking;
        Ok(())
    }

    /// Receive timeout in milliseconds; only meaningful on blocking sockets.
    pub fn set_recv_timeout(&mut self, ms: u32) -> Result<()> {
        let tv = TimeVal::milliseconds(i64::from(ms));
        socket::setsockopt(&self.fd, sockopt::ReceiveTimeout, &tv)
            .map_err(|e| self.fail("setsockopt(SO_RCVTIMEO)", Error::Io(e)))
    }

    /// Send timeout in milliseconds; only meaningful on blocking sockets.
    pub fn set_send_timeout(&mut self, ms: u32) -> Result<()> {
        let tv = TimeVal::milliseconds(i64::from(ms));
        socket::setsockopt(&self.fd, sockopt::SendTimeout, &tv)
            .map_err(|e| self.fail("setsockopt(SO_SNDTIMEO)", Error::Io(e)))
    }

    /// One `send(2)`. The count may be short; callers loop.
    pub fn send(&mut self, buf: &[u8], flags: MsgFlags) -> Result<usize> {
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        let flags = flags | MsgFlags::MSG_NOSIGNAL;

        loop {
            match socket::send(self.fd.as_raw_fd(), buf, flags) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => {
                    return Err(Error::WantWrite)
                }
                Err(e) => return Err(self.fail("send", Error::Io(e))),
            }
        }
    }

    /// One `recv(2)`. `Ok(0)` on a non-empty buffer means the peer shut down.
    pub fn recv(&mut self, buf: &mut [u8], flags: MsgFlags) -> Result<usize> {
        loop {
            match socket::recv(self.fd.as_raw_fd(), buf, flags) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) if e == Errno::EAGAIN || e == Errno::EWOULDBLOCK => {
                    return Err(Error::WantRead)
                }
                Err(e) => return Err(self.fail("recv", Error::Io(e))),
            }
        }
    }

    pub fn local_addr_string(&self) -> String {
        socket::getsockname::<SockaddrStorage>(self.fd.as_raw_fd())
            .ok()
            .and_then(|addr| format_addr(&addr))
            .unwrap_or_else(|| NO_ADDR.to_string())
    }

    pub fn remote_addr_string(&self) -> String {
        socket::getpeername::<SockaddrStorage>(self.fd.as_raw_fd())
            .ok()
            .and_then(|addr| format_addr(&addr))
            .unwrap_or_else(|| NO_ADDR.to_string())
    }

    /// `Local(host:port), Remote(host:port)`.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    /// Close the descriptor. Consumes the socket, so it cannot be closed
    /// twice; a dropped socket is closed without reporting errors.
    pub fn term(self) -> Result<()> {
        let raw = self.fd.into_raw_fd();
        debug!(fd = raw, "closing socket");
        unistd::close(raw).map_err(Error::Io)
    }
}

fn format_addr(addr: &SockaddrStorage) -> Option<String> {
    if let Some(v4) = addr.as_sockaddr_in() {
        let v4 = SocketAddrV4::from(*v4);
        return Some(format!("{}:{}", v4.ip(), v4.port()));
    }
    if let Some(v6) = addr.as_sockaddr_in6() {
        let v6 = SocketAddrV6::from(*v6);
        return Some(format!("{}:{}", v6.ip(), v6.port()));
    }
    addr.as_unix_addr()
        .and_then(|unix| unix.path())
        .map(|path| path.display().to_string())
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Local({}), Remote({})",
            self.local_addr_string(),
            self.remote_addr_string()
        )
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
