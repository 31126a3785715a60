//! Cross-thread wake-up for a blocked reactor.
//!
//! A non-blocking pipe whose read end sits in every wait. Any thread holding a
//! [`ReactorWaker`] writes one byte to force the wait to return; readiness
//! already observed in that wait is still dispatched.

use crate::reactor::poller::{set_cloexec, set_nonblocking};

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct WakePipe {
    read: OwnedFd,
    shared: Arc<WakeShared>,
}

struct WakeShared {
    write: OwnedFd,
    stop: AtomicBool,
}

/// Handle that interrupts a reactor from any thread.
///
/// Waking does not touch any reactor table; it only causes the current or
/// next blocking wait to return early.
#[derive(Clone)]
pub struct ReactorWaker {
    shared: Arc<WakeShared>,
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            set_nonblocking(fd)?;
            set_cloexec(fd)?;
        }

        Ok(Self {
            read,
            shared: Arc::new(WakeShared {
                write,
                stop: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    pub(crate) fn waker(&self) -> ReactorWaker {
        ReactorWaker {
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    pub(crate) fn clear_stop(&self) {
        self.shared.stop.store(false, Ordering::Release);
    }

    /// Empties the pipe so the next wait blocks again.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.fd(), buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl ReactorWaker {
    /// Forces the reactor's current or next wait to return.
    pub fn wake(&self) {
        let byte = [1u8];
        // A full pipe already guarantees a pending wake-up.
        let _ = unsafe {
            libc::write(
                self.shared.write.as_raw_fd(),
                byte.as_ptr() as *const _,
                1,
            )
        };
    }

    /// Asks `run_forever` to return after the current iteration, then wakes it.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.wake();
    }
}
