use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use std::os::fd::RawFd;

pub fn set_fd_blocking(fd: RawFd, blocking: bool) -> nix::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let prev_flags = OFlag::from_bits_truncate(bits);
    let flags = if blocking {
        prev_flags - OFlag::O_NONBLOCK
    } else {
        prev_flags | OFlag::O_NONBLOCK
    };
    if flags != prev_flags {
        fcntl(fd, FcntlArg::F_SETFL(flags))?;
    }
    Ok(())
}

pub fn set_fd_cloexec(fd: RawFd) -> nix::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFD)?;
    let prev_flags = FdFlag::from_bits_truncate(bits);
    fcntl(fd, FcntlArg::F_SETFD(prev_flags | FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Stop writes to a closed peer from raising SIGPIPE. Targets without
/// `SO_NOSIGPIPE` pass `MSG_NOSIGNAL` on every send instead.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn set_fd_nosigpipe(fd: RawFd) -> nix::Result<()> {
    let on: nix::libc::c_int = 1;
    // SAFETY: `on` outlives the call and its size is passed alongside.
    let rc = unsafe {
        nix::libc::setsockopt(
            fd,
            nix::libc::SOL_SOCKET,
            nix::libc::SO_NOSIGPIPE,
            &on as *const nix::libc::c_int as *const nix::libc::c_void,
            std::mem::size_of::<nix::libc::c_int>() as nix::libc::socklen_t,
        )
    };
    nix::errno::Errno::result(rc).map(drop)
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub fn set_fd_nosigpipe(_fd: RawFd) -> nix::Result<()> {
    Ok(())
}
