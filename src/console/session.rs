use crate::console::output::ConsoleOutput;
use crate::console::telnet::{Negotiation, TelnetMachine};
use crate::engine::{CommandStatus, Engine};

use tracing::trace;

/// Longest command line a console accepts.
pub const LINE_CAPACITY: usize = 1023;

pub const PROMPT: &[u8] = b"> ";

/// Typing this line turns local echo off instead of running a command.
pub const NOECHO_COMMAND: &str = "noecho";

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const END_OF_TRANSMISSION: u8 = 0x04;

/// What the owner of a session should do after feeding it input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Continue,
    /// The user ended the session with Ctrl-D on an empty line.
    Close,
    /// A command asked for the simulator to stop.
    Shutdown,
}

/// One interactive console: line editing over an optional telnet layer.
pub struct ConsoleSession {
    line: Vec<u8>,
    echo: bool,
    telnet: Option<TelnetMachine>,
    shutdown_on_close: bool,
    out: Box<dyn ConsoleOutput>,
}

impl ConsoleSession {
    /// A telnet-negotiating network console with echo on.
    pub fn telnet(out: Box<dyn ConsoleOutput>) -> Self {
        Self {
            line: Vec::with_capacity(64),
            echo: true,
            telnet: Some(TelnetMachine::new()),
            shutdown_on_close: false,
            out,
        }
    }

    /// A raw console, such as the process's own terminal.
    ///
    /// With `shutdown_on_close` the session is the controlling console and
    /// closing it stops the simulator.
    pub fn raw(out: Box<dyn ConsoleOutput>, shutdown_on_close: bool) -> Self {
        Self {
            line: Vec::with_capacity(64),
            echo: true,
            telnet: None,
            shutdown_on_close,
            out,
        }
    }

    pub fn line(&self) -> &[u8] {
        &self.line
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn is_telnet(&self) -> bool {
        self.telnet.is_some()
    }

    pub fn shutdown_on_close(&self) -> bool {
        self.shutdown_on_close
    }

    pub fn output(&mut self) -> &mut dyn ConsoleOutput {
        self.out.as_mut()
    }

    /// Feeds received bytes, stopping at the first byte that ends the session.
    pub fn feed(&mut self, bytes: &[u8], engine: &mut dyn Engine) -> SessionEvent {
        for &byte in bytes {
            let event = self.handle_byte(byte, engine);
            if event != SessionEvent::Continue {
                return event;
            }
        }
        SessionEvent::Continue
    }

    pub fn handle_byte(&mut self, byte: u8, engine: &mut dyn Engine) -> SessionEvent {
        let byte = match self.telnet.as_mut().map(|t| t.push(byte)) {
            None => byte,
            Some(Negotiation::Data(byte)) => byte,
            Some(Negotiation::Consumed) => return SessionEvent::Continue,
            Some(Negotiation::Reply(reply)) => {
                trace!(?reply, "telnet negotiation reply");
                self.out.write_raw(&reply);
                return SessionEvent::Continue;
            }
        };

        match byte {
            // Telnet clients send CR NUL; the NUL carries nothing.
            0 => {}
            BACKSPACE | DELETE => {
                if self.line.pop().is_some() && self.echo {
                    self.out.write_raw(b"\x08 \x08");
                }
            }
            END_OF_TRANSMISSION => {
                if self.line.is_empty() {
                    if self.echo {
                        self.out.write_raw(b"\n");
                    }
                    return SessionEvent::Close;
                }
            }
            b'\n' | b'\r' => return self.finish_line(engine),
            _ => {
                if self.line.len() >= LINE_CAPACITY {
                    let notice =
                        format!("\nCommand is too long, max of {LINE_CAPACITY} characters\n");
                    self.out.write_raw(notice.as_bytes());
                } else {
                    self.line.push(byte);
                    if self.echo {
                        self.out.write_raw(&[byte]);
                    }
                }
            }
        }

        SessionEvent::Continue
    }

    fn finish_line(&mut self, engine: &mut dyn Engine) -> SessionEvent {
        if self.echo {
            self.out.write_raw(b"\n");
            if self.telnet.is_some() {
                self.out.write_raw(b"\r");
            }
        }

        let command = std::mem::take(&mut self.line);

        let status = if command == NOECHO_COMMAND.as_bytes() {
            self.echo = false;
            CommandStatus::Continue
        } else if command.trim_ascii().is_empty() {
            CommandStatus::Continue
        } else {
            engine.dispatch_command(self.out.as_mut(), &command)
        };

        if self.echo {
            self.out.write_raw(PROMPT);
        }

        match status {
            CommandStatus::Continue => SessionEvent::Continue,
            CommandStatus::Shutdown => SessionEvent::Shutdown,
        }
    }
}
