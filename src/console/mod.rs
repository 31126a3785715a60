//! Interactive consoles.
//!
//! A console is a line-editing session over either a telnet connection or
//! the process's own terminal. Completed lines go to the engine's command
//! dispatcher; the [`ConsoleRegistry`] tracks every open session so they can
//! all be closed on shutdown.

pub mod listener;
pub mod output;
pub mod registry;
pub mod session;
pub mod telnet;
pub mod terminal;

pub use listener::{ConsoleHub, ConsoleListener};
pub use output::{CaptureOutput, ConsoleOutput, NullOutput, SocketOutput, StdoutOutput};
pub use registry::{ConsoleRegistry, SessionKey};
pub use session::{ConsoleSession, LINE_CAPACITY, SessionEvent};
pub use telnet::TelnetMachine;
pub use terminal::TerminalGuard;
