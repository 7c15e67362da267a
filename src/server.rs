//! The echo reactor: one listener, one wakeup pipe, any number of clients.
//!
//! The reactor is generic over the poller backend, which keeps the loop from
//! leaning on anything a particular kernel facility happens to offer.
use std::{collections::HashMap, io, sync::Arc};

use nix::errno::Errno;
use pollsock::{AsPoller, Error, Events, Family, Handle, MsgFlags, Pipe, Socket};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::conf::{ConfError, Config};

const LISTENER: usize = 0;
const WAKEUP: usize = 1;
const FIRST_CONN: usize = 2;

const TAG_LISTENER: i32 = 0;
const TAG_PIPE: i32 = 1;
const TAG_CONN: i32 = 2;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Net(#[from] Error),
    #[error(transparent)]
    Conf(#[from] ConfError),
    #[error("signal handling failed: {0}")]
    Signal(#[from] Errno),
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct Conn {
    sock: Socket,
    pending: Vec<u8>,
}

impl Conn {
    /// Send as much of `pending` as the socket takes right now.
    fn flush(&mut self) -> Result<(), Error> {
        while !self.pending.is_empty() {
            match self.sock.send(&self.pending, MsgFlags::empty()) {
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(Error::WantWrite) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

pub struct Server<P> {
    listener: Socket,
    wakeup: Arc<Pipe>,
    /// Registered copy of the pipe's handle; the pipe itself is shared.
    wakeup_handle: Handle,
    poller: P,
    conns: HashMap<usize, Conn>,
    next_token: usize,
    poll_timeout_ms: i32,
    read_bufsize: usize,
    running: bool,
}

impl<P> Server<P>
where
    P: AsPoller,
{
    pub fn bind(config: &Config, mut poller: P) -> Result<Self, ServerError> {
        let mut listener = Socket::new(TAG_LISTENER, false, Family::from(config.family))?;
        listener.listen(&config.host, config.port)?;
        poller.add(listener.handle_mut(), Events::READ, LISTENER)?;

        let wakeup = Pipe::new(TAG_PIPE)?;
        let mut wakeup_handle = wakeup.handle().clone();
        poller.add(&mut wakeup_handle, Events::READ, WAKEUP)?;

        let server = Self {
            listener,
            wakeup: Arc::new(wakeup),
            wakeup_handle,
            poller,
            conns: HashMap::new(),
            next_token: FIRST_CONN,
            poll_timeout_ms: config.poll_timeout_ms,
            read_bufsize: config.read_bufsize.max(1),
            running: true,
        };
        info!(local = %server.local_addr(), "echo server listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> String {
        self.listener.local_addr_string()
    }

    /// The pipe other threads write to in order to stop the loop.
    pub fn wakeup(&self) -> Arc<Pipe> {
        Arc::clone(&self.wakeup)
    }

    pub fn run(mut self) -> Result<(), ServerError> {
        let mut buf = vec![0u8; self.read_bufsize];
        while self.running {
            let n = self.poller.wait(self.poll_timeout_ms)?;
            for i in 0..n {
                let token = self.poller.data(i);
                let events = self.poller.event(i);
                match token {
                    LISTENER => self.accept_pending()?,
                    WAKEUP => self.handle_wakeup()?,
                    _ => self.handle_conn(token, events, &mut buf)?,
                }
            }
        }
        self.shutdown()
    }

    fn accept_pending(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept(TAG_CONN, false) {
                Ok(mut sock) => {
                    let token = self.next_token;
                    self.next_token += 1;
                    self.poller.add(sock.handle_mut(), Events::READ, token)?;
                    info!(token, conn = %sock, "client connected");
                    self.conns.insert(
                        token,
                        Conn {
                            sock,
                            pending: Vec::new(),
                        },
                    );
                }
                Err(Error::WantRead) => return Ok(()),
                Err(e) => {
                    // A failed accept only costs that one client.
                    warn!(error = %e, detail = self.listener.error(), "accept failed");
                    return Ok(());
                }
            }
        }
    }

    fn handle_wakeup(&mut self) -> Result<(), ServerError> {
        let mut token = [0u8; 1];
        self.wakeup.read(&mut token)?;
        info!("shutdown requested");
        self.running = false;
        Ok(())
    }

    fn handle_conn(
        &mut self,
        token: usize,
        events: Events,
        buf: &mut [u8],
    ) -> Result<(), ServerError> {
        // kqueue may report both directions of a client we already closed.
        let Some(conn) = self.conns.get_mut(&token) else {
            return Ok(());
        };

        let mut closed = false;
        // Nothing more is read until the previous echo is out.
        if events.is_readable() && conn.pending.is_empty() {
            match conn.sock.recv(buf, MsgFlags::empty()) {
                Ok(0) => closed = true,
                Ok(n) => conn.pending.extend_from_slice(&buf[..n]),
                Err(Error::WantRead) => {}
                Err(e) => {
                    debug!(token, error = %e, "recv failed");
                    closed = true;
                }
            }
        }
        if !closed {
            if let Err(e) = conn.flush() {
                debug!(token, error = %e, detail = conn.sock.error(), "send failed");
                closed = true;
            }
        }
        if closed {
            return self.close(token);
        }
        self.sync_interest(token)
    }

    /// Wait for READ while idle and only for WRITE while an echo is pending.
    fn sync_interest(&mut self, token: usize) -> Result<(), ServerError> {
        let Some(conn) = self.conns.get_mut(&token) else {
            return Ok(());
        };
        let wanted = if conn.pending.is_empty() {
            Events::READ
        } else {
            Events::WRITE
        };
        let current = conn.sock.handle().interest();
        if current == wanted {
            return Ok(());
        }

        // Add first so the registration never drops to nothing in between.
        self.poller.add(conn.sock.handle_mut(), wanted, token)?;
        self.poller
            .del(conn.sock.handle_mut(), current - wanted, token)?;
        Ok(())
    }

    fn close(&mut self, token: usize) -> Result<(), ServerError> {
        if let Some(mut conn) = self.conns.remove(&token) {
            info!(token, conn = %conn.sock, "client disconnected");
            let interest = conn.sock.handle().interest();
            self.poller.del(conn.sock.handle_mut(), interest, token)?;
            conn.sock.term()?;
        }
        Ok(())
    }

    /// Drop every client and take the listener and the pipe out of the
    /// poller, leaving it empty.
    fn release(&mut self) -> Result<(), ServerError> {
        let tokens: Vec<usize> = self.conns.keys().copied().collect();
        for token in tokens {
            self.close(token)?;
        }
        let interest = self.listener.handle().interest();
        self.poller
            .del(self.listener.handle_mut(), interest, LISTENER)?;
        let interest = self.wakeup_handle.interest();
        self.poller
            .del(&mut self.wakeup_handle, interest, WAKEUP)?;
        Ok(())
    }

    fn shutdown(mut self) -> Result<(), ServerError> {
        self.release()?;
        self.poller.term()?;
        self.listener.term()?;
        info!("echo server stopped");
        Ok(())
    }
}
