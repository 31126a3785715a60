//! Raw mode for the controlling terminal.

use std::io;
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

struct Saved {
    fd: RawFd,
    termios: Option<libc::termios>,
    flags: libc::c_int,
}

/// Puts a terminal into raw mode and puts it back exactly once.
///
/// Input processing, echo, canonical mode and signal generation are turned
/// off. A descriptor that is not a terminal is left alone apart from its
/// file-status flags, which are still saved and restored.
pub struct TerminalGuard {
    saved: Option<Saved>,
}

impl TerminalGuard {
    pub fn raw(fd: RawFd) -> io::Result<Self> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        let termios = if unsafe { libc::tcgetattr(fd, &mut termios) } == 0 {
            let original = termios;

            termios.c_iflag &= !(libc::IGNBRK
                | libc::BRKINT
                | libc::PARMRK
                | libc::ISTRIP
                | libc::INLCR
                | libc::IGNCR
                | libc::ICRNL
                | libc::IXON);
            termios.c_lflag &=
                !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);

            if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &termios) } < 0 {
                return Err(io::Error::last_os_error());
            }
            Some(original)
        } else {
            debug!(fd, "console input is not a terminal");
            None
        };

        Ok(Self {
            saved: Some(Saved {
                fd,
                termios,
                flags,
            }),
        })
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }

    /// Restores the saved terminal mode and flags. Later calls do nothing.
    pub fn restore(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };

        if let Some(termios) = saved.termios {
            unsafe { libc::tcdrain(saved.fd) };
            if unsafe { libc::tcsetattr(saved.fd, libc::TCSADRAIN, &termios) } < 0 {
                warn!(err = %io::Error::last_os_error(), "unable to restore terminal mode");
            }
        }
        if unsafe { libc::fcntl(saved.fd, libc::F_SETFL, saved.flags) } < 0 {
            warn!(err = %io::Error::last_os_error(), "unable to restore console flags");
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
