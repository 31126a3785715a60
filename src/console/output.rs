//! Output sinks for console sessions.
//!
//! Engine output is line-translated (`\n` becomes `\n\r`) so it renders on
//! raw-mode terminals and telnet clients alike. Negotiation replies and echo
//! go out untouched through [`ConsoleOutput::write_raw`].

use std::cell::RefCell;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::rc::Rc;
use tracing::debug;

pub trait ConsoleOutput {
    /// Writes bytes exactly as given.
    fn write_raw(&mut self, bytes: &[u8]);

    /// Writes text, following every newline with a carriage return.
    fn print(&mut self, text: &str) {
        let mut rest = text.as_bytes();
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.write_raw(&rest[..=pos]);
            self.write_raw(b"\r");
            rest = &rest[pos + 1..];
        }
        if !rest.is_empty() {
            self.write_raw(rest);
        }
    }

    /// Tells the peer no more output is coming.
    fn close(&mut self) {}
}

/// Console output to a connected socket.
pub struct SocketOutput {
    stream: Rc<TcpStream>,
}

impl SocketOutput {
    pub fn new(stream: Rc<TcpStream>) -> Self {
        Self { stream }
    }
}

impl ConsoleOutput for SocketOutput {
    fn write_raw(&mut self, bytes: &[u8]) {
        if let Err(err) = write_all(&mut &*self.stream, bytes) {
            debug!(%err, "console write dropped");
        }
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Console output to the process's standard output.
#[derive(Default)]
pub struct StdoutOutput;

impl ConsoleOutput for StdoutOutput {
    fn write_raw(&mut self, bytes: &[u8]) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = write_all(&mut stdout, bytes).and_then(|_| stdout.flush()) {
            debug!(%err, "stdout write dropped");
        }
    }
}

/// Discards everything; the stdio console's sink under `--nostdio`.
#[derive(Default)]
pub struct NullOutput;

impl ConsoleOutput for NullOutput {
    fn write_raw(&mut self, _bytes: &[u8]) {}
}

/// Collects output in memory. Clones share one buffer.
#[derive(Clone, Default)]
pub struct CaptureOutput {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

impl ConsoleOutput for CaptureOutput {
    fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.borrow_mut().extend_from_slice(bytes);
    }
}

// A short write on a non-blocking socket drops the remainder rather than
// stalling the reactor thread.
fn write_all<W: Write>(writer: &mut W, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_translates_newlines() {
        let mut out = CaptureOutput::new();
        out.print("a\nb\n");
        assert_eq!(out.contents(), b"a\n\rb\n\r");
    }

    #[test]
    fn print_without_newline_is_verbatim() {
        let mut out = CaptureOutput::new();
        out.print("no newline");
        assert_eq!(out.text(), "no newline");
    }

    #[test]
    fn write_raw_is_untouched() {
        let mut out = CaptureOutput::new();
        out.write_raw(b"x\ny");
        assert_eq!(out.contents(), b"x\ny");
    }
}
