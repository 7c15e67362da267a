//! A self-pipe for waking a reactor blocked in `wait` from another thread.
//!
//! Both ends are blocking. Only the read end is exposed as a [`Handle`], the
//! write end is meant to be poked through `&Pipe` by whoever wants the
//! reactor's attention. Writes of at most `PIPE_BUF` bytes are atomic; keep
//! traffic to single-byte tokens.
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::sync::{Mutex, PoisonError};

use nix::errno::Errno;
use nix::unistd;
use tracing::debug;

use crate::error::{record, ErrBuf, Error, Result};
use crate::fd::set_fd_cloexec;
use crate::handle::Handle;

#[derive(Debug)]
pub struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
    handle: Handle,
    err: Mutex<ErrBuf>,
}

impl Pipe {
    pub fn new(tag: i32) -> Result<Self> {
        let (read, write) = unistd::pipe().map_err(Error::Resource)?;
        set_fd_cloexec(read.as_raw_fd()).map_err(Error::Resource)?;
        set_fd_cloexec(write.as_raw_fd()).map_err(Error::Resource)?;

        let handle = Handle::new(read.as_raw_fd(), tag);
        debug!(read = read.as_raw_fd(), write = write.as_raw_fd(), "pipe created");
        Ok(Self {
            read,
            write,
            handle,
            err: Mutex::new(ErrBuf::new()),
        })
    }

    /// Handle of the read end, the one to register with a poller.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }

    fn fail(&self, op: &str, err: Error) -> Error {
        let mut buf = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        record(&mut buf, op, err)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        loop {
            match unistd::write(&self.write, data) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(self.fail("pipe write", Error::Io(e))),
            }
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match unistd::read(self.read.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(self.fail("pipe read", Error::Io(e))),
            }
        }
    }

    /// Copy of the last failure recorded on this pipe.
    pub fn error(&self) -> ErrBuf {
        self.err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close both ends. The read end must already be removed from any
    /// poller it was registered with.
    pub fn term(self) -> Result<()> {
        let read = self.read.into_raw_fd();
        let write = self.write.into_raw_fd();
        let closed_read = unistd::close(read);
        let closed_write = unistd::close(write);
        closed_read.and(closed_write).map_err(Error::Io)
    }
}
