//! Non-blocking stream sockets, a self-pipe and a readiness poller.
//!
//! The pieces are meant for a single reactor thread that owns its loop:
//!
//! - [`Socket`]: TCP (IPv4/IPv6) and Unix-domain stream sockets with a
//!   two-step non-blocking connect.
//! - [`Pipe`]: a blocking pipe used to wake the reactor from other threads.
//! - [`Poller`]: epoll, kqueue or poll(2), whichever the target offers,
//!   behind [`AsPoller`].
//! - [`Handle`]: what sockets and pipes hand to a poller.
//!
//! Would-block conditions surface as [`Error::WantRead`] and
//! [`Error::WantWrite`]. They are not failures: register the handle for the
//! matching direction and retry when the poller reports it.
//!
//! ```no_run
//! use pollsock::{AsPoller, Events, Family, MsgFlags, Poller, Socket};
//!
//! let mut listener = Socket::new(0, false, Family::Inet)?;
//! listener.listen("127.0.0.1", 7878)?;
//!
//! let mut poller = Poller::new()?;
//! poller.add(listener.handle_mut(), Events::READ, 0)?;
//!
//! let n = poller.wait(1000)?;
//! for i in 0..n {
//!     if poller.event(i).is_readable() && poller.data(i) == 0 {
//!         let mut conn = listener.accept(1, false)?;
//!         let _ = conn.send(b"hello\n", MsgFlags::empty());
//!     }
//! }
//! # Ok::<(), pollsock::Error>(())
//! ```
pub mod error;
mod fd;
pub mod handle;
pub mod pipe;
pub mod poller;
pub mod socket;

pub use error::{to_code, ErrBuf, Error, Result, ERR_BUF_LEN};
pub use handle::{Events, Handle};
pub use nix::sys::socket::MsgFlags;
pub use pipe::Pipe;
pub use poller::{AsPoller, PollPoller, Poller, DEFAULT_CAPACITY};
pub use socket::{Family, Socket, State, BUF_SIZE};
