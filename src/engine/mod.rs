//! Boundary with the management-controller protocol engine.
//!
//! The engine decodes and executes protocol messages and console commands;
//! the core only moves bytes and time to it. Every method runs on the
//! reactor thread and must not block, except where a command deliberately
//! uses a [`Sleeper`](crate::thread::Sleeper).

mod diag;

pub use diag::DiagnosticEngine;

use crate::channel::ChannelId;
use crate::channel::lan::LanSender;
use crate::channel::serial::SerialSender;
use crate::console::ConsoleOutput;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

/// Engine shared by every channel and console on the reactor thread.
pub type SharedEngine = Rc<RefCell<dyn Engine>>;

/// Protocol family of a validated LAN datagram, from its class byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LanClass {
    /// Alert Standard Format discovery/presence messages.
    Asf,
    /// Management-protocol session and command messages.
    Management,
}

/// What the console should do after a command ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommandStatus {
    #[default]
    Continue,
    /// Stop the simulator, as if the controlling console had closed.
    Shutdown,
}

pub trait Engine {
    /// Handles one raw request and returns the response to send back, if any.
    fn handle_message(&mut self, request: &[u8]) -> Option<Vec<u8>>;

    /// A validated LAN datagram from `source`.
    ///
    /// By default management messages are answered through
    /// [`handle_message`](Self::handle_message) and ASF messages are dropped.
    fn handle_lan(
        &mut self,
        _channel: ChannelId,
        class: LanClass,
        packet: &[u8],
        source: SocketAddr,
        reply: &LanSender,
    ) {
        if class == LanClass::Management
            && let Some(response) = self.handle_message(packet)
        {
            let _ = reply.send_bytes(Some(&source), &response);
        }
    }

    /// A LAN socket was bound; `index` is its position in the channel's address list.
    fn lan_address(&mut self, _channel: ChannelId, _index: usize, _addr: SocketAddr) {}

    /// Bytes read from the serial peer.
    fn handle_serial(&mut self, _channel: ChannelId, data: &[u8], port: &SerialSender) {
        if let Some(response) = self.handle_message(data) {
            let _ = port.send_bytes(&response);
        }
    }

    fn serial_connected(&mut self, _channel: ChannelId, _port: &SerialSender) {}

    fn serial_disconnected(&mut self, _channel: ChannelId) {}

    /// Per-channel protocol timeouts, once per periodic tick for every LAN channel.
    fn channel_tick(&mut self, _channel: ChannelId, _elapsed_seconds: u32) {}

    /// Time-based state advancement, once per periodic tick.
    fn tick(&mut self, elapsed_seconds: u32);

    /// Runs one console command line, writing any output to `out`.
    ///
    /// `command` is the line exactly as typed; it need not be UTF-8.
    fn dispatch_command(&mut self, out: &mut dyn ConsoleOutput, command: &[u8]) -> CommandStatus;

    /// The simulator is about to stop.
    fn shutdown(&mut self) {}
}
