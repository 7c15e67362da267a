//! Readiness notification over exactly one kernel facility per target.
//!
//! Linux gets epoll, the BSD family (macOS included) gets kqueue and every
//! other Unix falls back to poll(2). Enabling the `poll-backend` feature
//! forces the fallback everywhere. Whatever is picked is exported as
//! [`Poller`] and driven through [`AsPoller`].
//!
//! The poll(2) backend builds on every Unix and stays reachable as
//! [`PollPoller`] next to the native one.
mod interface;
pub use interface::{AsPoller, DEFAULT_CAPACITY};

#[cfg(all(not(feature = "poll-backend"), target_os = "linux"))]
mod epoll;

#[cfg(all(not(feature = "poll-backend"), target_os = "linux"))]
pub use epoll::EpollPoller as Poller;

#[cfg(all(
    not(feature = "poll-backend"),
    any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )
))]
mod kqueue;

#[cfg(all(
    not(feature = "poll-backend"),
    any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )
))]
pub use kqueue::KqueuePoller as Poller;

mod poll;
pub use poll::PollPoller;

#[cfg(any(
    feature = "poll-backend",
    not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))
))]
pub use poll::PollPoller as Poller;

/// Double `cap` until it can hold one more entry than `count`.
pub(crate) fn grown_capacity(cap: usize, count: usize) -> usize {
    let mut cap = cap.max(1);
    while cap <= count {
        cap *= 2;
    }
    cap
}

#[cfg(test)]
mod tests {
    use super::grown_capacity;

    #[test]
    fn capacity_doubles() {
        assert_eq!(grown_capacity(2, 2), 4);
        assert_eq!(grown_capacity(4, 4), 8);
        assert_eq!(grown_capacity(8, 3), 8);
        assert_eq!(grown_capacity(0, 0), 1);
    }
}
