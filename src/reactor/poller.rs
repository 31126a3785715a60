use libc::{
    F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, POLLERR, POLLHUP, POLLIN, POLLNVAL,
    fcntl, nfds_t, poll, pollfd,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Read-readiness multiplexer over `poll(2)`.
///
/// The interest set is rebuilt for every wait from the reactor's live
/// registrations, so there is no kernel-side state to keep in sync when a
/// registration goes away.
pub(crate) struct Poller {
    fds: Vec<pollfd>,
}

impl Poller {
    pub(crate) fn new() -> Self {
        Self {
            fds: Vec::with_capacity(16),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.fds.clear();
    }

    /// Adds `fd` to the next wait. Only read readiness is requested.
    pub(crate) fn push(&mut self, fd: RawFd) {
        self.fds.push(pollfd {
            fd,
            events: POLLIN,
            revents: 0,
        });
    }

    /// Blocks until one of the pushed descriptors is readable or `timeout` elapses.
    ///
    /// Returns the number of ready descriptors. `None` waits without limit.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => {
                // Round up so a timer never appears to fire before its deadline.
                let ms = d.as_micros().div_ceil(1_000);
                ms.min(i32::MAX as u128) as i32
            }
        };

        let n = unsafe { poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, timeout_ms) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }

    /// Whether the descriptor pushed at `position` reported readiness.
    ///
    /// Hang-up and error conditions count as readable so that the owner's
    /// next read observes the end of stream or the error.
    pub(crate) fn is_ready(&self, position: usize) -> bool {
        self.fds
            .get(position)
            .is_some_and(|p| p.revents & (POLLIN | POLLHUP | POLLERR | POLLNVAL) != 0)
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
