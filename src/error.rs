//! Error values and the bounded per-object message buffer.
//!
//! Every fallible call returns an [`Error`], which is `Copy` and never
//! allocates. The object that failed additionally keeps a human readable
//! description in its [`ErrBuf`], overwritten by the next failure.
use std::fmt;

use nix::errno::Errno;
use thiserror::Error;

/// Capacity of an [`ErrBuf`], including the reserved terminator byte.
pub const ERR_BUF_LEN: usize = 128;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("operation would block, retry once readable")]
    WantRead,
    #[error("operation would block, retry once writable")]
    WantWrite,
    #[error("failed to allocate resource: {0}")]
    Resource(Errno),
    #[error("address resolution failed")]
    Resolve,
    #[error("failed to bind: {0}")]
    Bind(Errno),
    #[error("failed to listen: {0}")]
    Listen(Errno),
    #[error("failed to accept: {0}")]
    Accept(Errno),
    #[error("failed to connect: {0}")]
    Connect(Errno),
    #[error("i/o failed: {0}")]
    Io(Errno),
    #[error("poll failed: {0}")]
    Poll(Errno),
}

impl Error {
    pub const CODE_WANT_READ: i32 = -4;
    pub const CODE_WANT_WRITE: i32 = -2;
    pub const CODE_ERROR: i32 = -1;

    /// Numeric sentinel for this error in the classic integer convention.
    pub fn code(&self) -> i32 {
        match self {
            Error::WantRead => Self::CODE_WANT_READ,
            Error::WantWrite => Self::CODE_WANT_WRITE,
            _ => Self::CODE_ERROR,
        }
    }

    /// True for the would-block signals, which callers retry after the
    /// poller reports the matching readiness.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WantRead | Error::WantWrite)
    }

    /// The OS error behind this failure, if there was one.
    pub fn errno(&self) -> Option<Errno> {
        match *self {
            Error::Resource(e)
            | Error::Bind(e)
            | Error::Listen(e)
            | Error::Accept(e)
            | Error::Connect(e)
            | Error::Io(e)
            | Error::Poll(e) => Some(e),
            _ => None,
        }
    }
}

/// Collapse a `Result<usize>` into the integer convention: byte counts stay
/// non-negative, failures become their sentinel.
pub fn to_code(res: Result<usize>) -> i64 {
    match res {
        Ok(n) => n as i64,
        Err(e) => e.code() as i64,
    }
}

/// Fixed-capacity error text, stored inline.
///
/// Holds at most `ERR_BUF_LEN - 1` bytes. Longer messages are cut at the last
/// character boundary that fits.
#[derive(Clone)]
pub struct ErrBuf {
    buf: [u8; ERR_BUF_LEN],
    len: usize,
}

impl ErrBuf {
    pub const fn new() -> Self {
        Self {
            buf: [0; ERR_BUF_LEN],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Replace the contents with the formatted message.
    pub fn set(&mut self, args: fmt::Arguments<'_>) {
        self.clear();
        // Writing into ErrBuf truncates instead of failing.
        let _ = fmt::Write::write_fmt(self, args);
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ErrBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for ErrBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = ERR_BUF_LEN - 1 - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

impl fmt::Debug for ErrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrBuf").field(&self.as_str()).finish()
    }
}

impl fmt::Display for ErrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record `err` for operation `op` into `buf` and hand the error back, so
/// call sites read `return Err(record(&mut self.err, "bind", e))`.
pub(crate) fn record(buf: &mut ErrBuf, op: &str, err: Error) -> Error {
    match err.errno() {
        Some(errno) => buf.set(format_args!("{op}: {}", errno.desc())),
        None => buf.set(format_args!("{op}: {err}")),
    }
    tracing::warn!(op, error = %err, "operation failed");
    err
}
