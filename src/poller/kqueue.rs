use nix::errno::Errno;
use nix::libc::timespec;
use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};
use nix::sys::time::TimeSpec;
use std::time::Duration;
use tracing::{debug, trace};

use super::{grown_capacity, AsPoller, DEFAULT_CAPACITY};
use crate::error::{record, ErrBuf, Error, Result};
use crate::handle::{Events, Handle};

const NO_TIME_WAIT: timespec = timespec {
    tv_sec: 0,
    tv_nsec: 0,
};

pub struct KqueuePoller {
    kq: Kqueue,
    eventlist: Vec<KEvent>,
    count: usize,
    ready: usize,
    err: ErrBuf,
}

fn empty_kevent() -> KEvent {
    KEvent::new(
        0,
        EventFilter::EVFILT_READ,
        EventFlag::empty(),
        FilterFlag::empty(),
        0,
        0,
    )
}

/// One change per direction in `events`.
fn changes(fd: usize, events: Events, flags: EventFlag, data: usize) -> ([KEvent; 2], usize) {
    let mut changelist = [empty_kevent(), empty_kevent()];
    let mut n = 0;
    if events.is_readable() {
        changelist[n] = KEvent::new(
            fd,
            EventFilter::EVFILT_READ,
            flags,
            FilterFlag::empty(),
            0,
            data as _,
        );
        n += 1;
    }
    if events.is_writable() {
        changelist[n] = KEvent::new(
            fd,
            EventFilter::EVFILT_WRITE,
            flags,
            FilterFlag::empty(),
            0,
            data as _,
        );
        n += 1;
    }
    (changelist, n)
}

impl KqueuePoller {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let kq = Kqueue::new().map_err(Error::Resource)?;
        let eventlist = vec![empty_kevent(); capacity.max(1)];
        Ok(Self {
            kq,
            eventlist,
            count: 0,
            ready: 0,
            err: ErrBuf::new(),
        })
    }

    fn grow(&mut self) -> Result<()> {
        let cap = grown_capacity(self.eventlist.len(), self.count);
        let extra = cap - self.eventlist.len();
        if self.eventlist.try_reserve_exact(extra).is_err() {
            return Err(record(&mut self.err, "kqueue grow", Error::Resource(Errno::ENOMEM)));
        }
        self.eventlist.resize(cap, empty_kevent());
        Ok(())
    }

    fn apply(&mut self, op: &str, changelist: &[KEvent]) -> Result<()> {
        self.kq
            .kevent(changelist, &mut [], Some(NO_TIME_WAIT))
            .map(|_| ())
            .map_err(|e| record(&mut self.err, op, Error::Poll(e)))
    }
}

impl AsPoller for KqueuePoller {
    fn add(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()> {
        let current = handle.interest();
        let added = events - current;
        if added.is_empty() {
            return Ok(());
        }

        if current.is_empty() && self.count == self.eventlist.len() {
            self.grow()?;
        }
        let (changelist, n) = changes(handle.fd() as usize, added, EventFlag::EV_ADD, data);
        self.apply("kevent(EV_ADD)", &changelist[..n])?;
        if current.is_empty() {
            self.count += 1;
        }

        handle.set_interest(current | added);
        debug!(fd = handle.fd(), interest = ?handle.interest(), "registered");
        Ok(())
    }

    fn del(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()> {
        let current = handle.interest();
        let removed = current & events;
        if removed.is_empty() {
            return Ok(());
        }

        let (changelist, n) = changes(handle.fd() as usize, removed, EventFlag::EV_DELETE, data);
        self.apply("kevent(EV_DELETE)", &changelist[..n])?;
        let remaining = current - removed;
        if remaining.is_empty() {
            self.count -= 1;
        }

        handle.set_interest(remaining);
        debug!(fd = handle.fd(), interest = ?remaining, "deregistered");
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        self.ready = 0;
        let timeout = if timeout_ms < 0 {
            None
        } else {
            let span = TimeSpec::from_duration(Duration::from_millis(timeout_ms as u64));
            Some(*span.as_ref())
        };

        match self.kq.kevent(&[], &mut self.eventlist, timeout) {
            Ok(n) => self.ready = n,
            Err(Errno::EINTR) => {}
            Err(e) => return Err(record(&mut self.err, "kevent", Error::Poll(e))),
        }
        trace!(ready = self.ready, registered = self.count, "kevent");
        Ok(self.ready)
    }

    fn data(&self, i: usize) -> usize {
        self.eventlist[..self.ready][i].udata() as usize
    }

    fn event(&self, i: usize) -> Events {
        let ev = &self.eventlist[..self.ready][i];
        if ev.flags().intersects(EventFlag::EV_EOF | EventFlag::EV_ERROR) {
            return Events::BOTH;
        }
        match ev.filter() {
            Ok(EventFilter::EVFILT_READ) => Events::READ,
            Ok(EventFilter::EVFILT_WRITE) => Events::WRITE,
            _ => Events::NONE,
        }
    }

    fn error(&self) -> &str {
        self.err.as_str()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.eventlist.len()
    }

    fn term(self) -> Result<()> {
        debug!(registered = self.count, "closing kqueue");
        drop(self.kq);
        Ok(())
    }
}
