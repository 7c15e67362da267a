//! poll(2) over a flat slot table.
//!
//! Each registered handle owns one slot of `fds` for as long as it stays
//! registered; the slot index is stored in the handle. Removing a handle turns
//! its slot into a tombstone (negative fd, which poll(2) skips) and queues the
//! index for reuse, so surviving slots never move and growth only appends.
use nix::errno::Errno;
use nix::libc;
use tracing::{debug, trace};

use super::{grown_capacity, AsPoller, DEFAULT_CAPACITY};
use crate::error::{record, ErrBuf, Error, Result};
use crate::handle::{Events, Handle};

const TOMBSTONE: libc::pollfd = libc::pollfd {
    fd: -1,
    events: 0,
    revents: 0,
};

pub struct PollPoller {
    fds: Vec<libc::pollfd>,
    data: Vec<usize>,
    free: Vec<usize>,
    ready: Vec<(usize, Events)>,
    cap: usize,
    count: usize,
    err: ErrBuf,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const RDHUP: libc::c_short = libc::POLLRDHUP;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RDHUP: libc::c_short = 0;

/// Peer shutdown, hang-up, error and a stale descriptor all read as both
/// directions.
const CLOSED: libc::c_short = RDHUP | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

fn poll_flags(events: Events) -> libc::c_short {
    let mut flags = RDHUP;
    if events.is_readable() {
        flags |= libc::POLLIN;
    }
    if events.is_writable() {
        flags |= libc::POLLOUT;
    }
    flags
}

fn ready_events(revents: libc::c_short) -> Events {
    if revents & CLOSED != 0 {
        return Events::BOTH;
    }
    let mut events = Events::NONE;
    if revents & libc::POLLIN != 0 {
        events |= Events::READ;
    }
    if revents & libc::POLLOUT != 0 {
        events |= Events::WRITE;
    }
    events
}

impl PollPoller {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let cap = capacity.max(1);
        let mut poller = Self {
            fds: Vec::new(),
            data: Vec::new(),
            free: Vec::new(),
            ready: Vec::new(),
            cap: 0,
            count: 0,
            err: ErrBuf::new(),
        };
        poller.reserve(cap)?;
        Ok(poller)
    }

    fn reserve(&mut self, cap: usize) -> Result<()> {
        let extra = cap - self.fds.len();
        let reserved = self
            .fds
            .try_reserve_exact(extra)
            .and_then(|_| self.data.try_reserve_exact(extra))
            .and_then(|_| self.free.try_reserve_exact(cap - self.free.len()))
            .and_then(|_| self.ready.try_reserve_exact(cap - self.ready.len()));
        if reserved.is_err() {
            return Err(record(&mut self.err, "poll grow", Error::Resource(Errno::ENOMEM)));
        }
        self.cap = cap;
        Ok(())
    }

    fn take_slot(&mut self) -> usize {
        match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.fds.push(TOMBSTONE);
                self.data.push(0);
                self.fds.len() - 1
            }
        }
    }
}

impl AsPoller for PollPoller {
    fn add(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()> {
        let current = handle.interest();
        let wanted = current | events;
        if wanted == current {
            return Ok(());
        }

        let slot = match handle.slot() {
            Some(slot) if !current.is_empty() => slot,
            _ => {
                if self.count == self.cap {
                    self.reserve(grown_capacity(self.cap, self.count))?;
                }
                let slot = self.take_slot();
                self.count += 1;
                handle.set_slot(Some(slot));
                slot
            }
        };
        self.fds[slot] = libc::pollfd {
            fd: handle.fd(),
            events: poll_flags(wanted),
            revents: 0,
        };
        self.data[slot] = data;

        handle.set_interest(wanted);
        debug!(fd = handle.fd(), slot, interest = ?wanted, "registered");
        Ok(())
    }

    fn del(&mut self, handle: &mut Handle, events: Events, _data: usize) -> Result<()> {
        let current = handle.interest();
        let remaining = current - events;
        if remaining == current {
            return Ok(());
        }

        let slot = match handle.slot() {
            Some(slot) if slot < self.fds.len() && self.fds[slot].fd == handle.fd() => slot,
            _ => return Err(record(&mut self.err, "poll del", Error::Poll(Errno::ENOENT))),
        };
        if remaining.is_empty() {
            self.fds[slot] = TOMBSTONE;
            self.data[slot] = 0;
            self.free.push(slot);
            self.count -= 1;
            handle.set_slot(None);
        } else {
            self.fds[slot].events = poll_flags(remaining);
        }

        handle.set_interest(remaining);
        debug!(fd = handle.fd(), slot, interest = ?remaining, "deregistered");
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        self.ready.clear();
        let timeout = timeout_ms.max(-1);

        // SAFETY: `fds` is a live, correctly sized array of pollfd.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout,
            )
        };
        let n = match Errno::result(rc) {
            Ok(n) => n as usize,
            Err(Errno::EINTR) => return Ok(0),
            Err(e) => return Err(record(&mut self.err, "poll", Error::Poll(e))),
        };

        for (slot, pfd) in self.fds.iter().enumerate() {
            if self.ready.len() == n {
                break;
            }
            if pfd.fd < 0 || pfd.revents == 0 {
                continue;
            }
            self.ready.push((self.data[slot], ready_events(pfd.revents)));
        }
        trace!(ready = self.ready.len(), registered = self.count, "poll");
        Ok(self.ready.len())
    }

    fn data(&self, i: usize) -> usize {
        self.ready[i].0
    }

    fn event(&self, i: usize) -> Events {
        self.ready[i].1
    }

    fn error(&self) -> &str {
        self.err.as_str()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.cap
    }

    fn term(self) -> Result<()> {
        debug!(registered = self.count, "releasing poll table");
        Ok(())
    }
}
