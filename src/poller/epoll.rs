use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use std::os::fd::BorrowedFd;
use tracing::{debug, trace};

use super::{grown_capacity, AsPoller, DEFAULT_CAPACITY};
use crate::error::{record, ErrBuf, Error, Result};
use crate::handle::{Events, Handle};

pub struct EpollPoller {
    epoll: Epoll,
    event_buffer: Vec<EpollEvent>,
    count: usize,
    ready: usize,
    err: ErrBuf,
}

/// Peer shutdown, hang-up and error all read as both directions.
const CLOSED: EpollFlags = EpollFlags::EPOLLRDHUP
    .union(EpollFlags::EPOLLHUP)
    .union(EpollFlags::EPOLLERR);

fn epoll_flags(events: Events) -> EpollFlags {
    // RDHUP is not implied like HUP and ERR are.
    let mut flags = EpollFlags::EPOLLRDHUP;
    if events.is_readable() {
        flags |= EpollFlags::EPOLLIN;
    }
    if events.is_writable() {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

impl EpollPoller {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(Error::Resource)?;
        let event_buffer = vec![EpollEvent::empty(); capacity.max(1)];
        Ok(Self {
            epoll,
            event_buffer,
            count: 0,
            ready: 0,
            err: ErrBuf::new(),
        })
    }

    fn grow(&mut self) -> Result<()> {
        let cap = grown_capacity(self.event_buffer.len(), self.count);
        let extra = cap - self.event_buffer.len();
        if self.event_buffer.try_reserve_exact(extra).is_err() {
            return Err(record(&mut self.err, "epoll grow", Error::Resource(Errno::ENOMEM)));
        }
        self.event_buffer.resize(cap, EpollEvent::empty());
        Ok(())
    }
}

impl AsPoller for EpollPoller {
    fn add(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()> {
        let current = handle.interest();
        let wanted = current | events;
        if wanted == current {
            return Ok(());
        }

        // SAFETY: the handle's owner keeps the descriptor open while it is
        // registered; the borrow does not outlive this call.
        let fd = unsafe { BorrowedFd::borrow_raw(handle.fd()) };
        let mut event = EpollEvent::new(epoll_flags(wanted), data as u64);
        if current.is_empty() {
            if self.count == self.event_buffer.len() {
                self.grow()?;
            }
            self.epoll
                .add(fd, event)
                .map_err(|e| record(&mut self.err, "epoll_ctl(ADD)", Error::Poll(e)))?;
            self.count += 1;
        } else {
            self.epoll
                .modify(fd, &mut event)
                .map_err(|e| record(&mut self.err, "epoll_ctl(MOD)", Error::Poll(e)))?;
        }

        handle.set_interest(wanted);
        debug!(fd = handle.fd(), interest = ?wanted, "registered");
        Ok(())
    }

    fn del(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()> {
        let current = handle.interest();
        let remaining = current - events;
        if remaining == current {
            return Ok(());
        }

        // SAFETY: see `add`.
        let fd = unsafe { BorrowedFd::borrow_raw(handle.fd()) };
        if remaining.is_empty() {
            self.epoll
                .delete(fd)
                .map_err(|e| record(&mut self.err, "epoll_ctl(DEL)", Error::Poll(e)))?;
            self.count -= 1;
        } else {
            let mut event = EpollEvent::new(epoll_flags(remaining), data as u64);
            self.epoll
                .modify(fd, &mut event)
                .map_err(|e| record(&mut self.err, "epoll_ctl(MOD)", Error::Poll(e)))?;
        }

        handle.set_interest(remaining);
        debug!(fd = handle.fd(), interest = ?remaining, "deregistered");
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        self.ready = 0;
        let timeout = if timeout_ms < 0 {
            EpollTimeout::NONE
        } else {
            EpollTimeout::try_from(timeout_ms)
                .map_err(|_| record(&mut self.err, "epoll_wait", Error::Poll(Errno::EINVAL)))?
        };

        match self.epoll.wait(&mut self.event_buffer, timeout) {
            Ok(n) => self.ready = n,
            Err(Errno::EINTR) => {}
            Err(e) => return Err(record(&mut self.err, "epoll_wait", Error::Poll(e))),
        }
        trace!(ready = self.ready, registered = self.count, "epoll_wait");
        Ok(self.ready)
    }

    fn data(&self, i: usize) -> usize {
        self.event_buffer[..self.ready][i].data() as usize
    }

    fn event(&self, i: usize) -> Events {
        let flags = self.event_buffer[..self.ready][i].events();
        if flags.intersects(CLOSED) {
            return Events::BOTH;
        }

        let mut events = Events::NONE;
        if flags.contains(EpollFlags::EPOLLIN) {
            events |= Events::READ;
        }
        if flags.contains(EpollFlags::EPOLLOUT) {
            events |= Events::WRITE;
        }
        events
    }

    fn error(&self) -> &str {
        self.err.as_str()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.event_buffer.len()
    }

    fn term(self) -> Result<()> {
        debug!(registered = self.count, "closing epoll");
        drop(self.epoll);
        Ok(())
    }
}
