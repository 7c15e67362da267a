//! The registration value shared by sockets and pipes.
//!
//! A poller never sees a `Socket` or a `Pipe`, only the [`Handle`] embedded in
//! it. The handle carries the raw descriptor (without owning it), the
//! directions currently registered, a caller-defined tag and, for the poll(2)
//! backend, the slot the descriptor occupies.
use std::os::fd::RawFd;

use bitflags::bitflags;

bitflags! {
    /// Readiness directions, as registered and as reported.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: u32 {
        const READ = 1;
        const WRITE = 2;
        /// Also what a hang-up or socket error is reported as.
        const BOTH = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Events {
    pub const NONE: Events = Events::empty();

    pub const fn is_readable(self) -> bool {
        self.contains(Events::READ)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Events::WRITE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    fd: RawFd,
    interest: Events,
    tag: i32,
    slot: Option<usize>,
}

impl Handle {
    pub fn new(fd: RawFd, tag: i32) -> Self {
        Self {
            fd,
            interest: Events::NONE,
            tag,
            slot: None,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Directions currently registered with a poller.
    pub fn interest(&self) -> Events {
        self.interest
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.tag = tag;
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub(crate) fn set_interest(&mut self, interest: Events) {
        self.interest = interest;
    }

    pub(crate) fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_combine() {
        let both = Events::READ | Events::WRITE;
        assert_eq!(both, Events::BOTH);
        assert!(both.is_readable() && both.is_writable());
        assert_eq!(both - Events::READ, Events::WRITE);
        assert_eq!(both & Events::WRITE, Events::WRITE);
        assert!((Events::READ - Events::READ).is_empty());
        assert!(both.contains(Events::READ));
        assert!(!Events::READ.contains(Events::BOTH));
    }

    #[test]
    fn events_bits_match_convention() {
        assert_eq!(Events::NONE.bits(), 0);
        assert_eq!(Events::READ.bits(), 1);
        assert_eq!(Events::WRITE.bits(), 2);
        assert_eq!(Events::from_bits_truncate(0xff), Events::BOTH);
        assert_eq!(Events::default(), Events::NONE);
        assert_eq!(Events::all(), Events::READ | Events::WRITE);
    }

    #[test]
    fn new_handle_is_unregistered() {
        let mut h = Handle::new(7, 3);
        assert_eq!(h.fd(), 7);
        assert_eq!(h.tag(), 3);
        h.set_tag(4);
        assert_eq!(h.tag(), 4);
        assert!(h.interest().is_empty());
        assert_eq!(h.slot(), None);
    }
}
