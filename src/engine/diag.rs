use crate::channel::ChannelId;
use crate::channel::lan::LanSender;
use crate::channel::serial::SerialSender;
use crate::console::ConsoleOutput;
use crate::engine::{CommandStatus, Engine, LanClass};
use crate::thread::{SleepOutcome, Sleeper};

use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const HELP: &str = "\
commands:
  help          show this list
  status        show traffic and tick counters
  sleep <ms>    block the simulator for <ms> milliseconds
  quit          stop the simulator
";

/// Stand-in engine that records traffic and answers a few console commands.
///
/// It does not decode management messages; every request is logged and left
/// unanswered.
pub struct DiagnosticEngine {
    sleeper: Option<Sleeper>,
    ticks: u64,
    lan_messages: u64,
    asf_messages: u64,
    serial_bytes: u64,
    serial_peers: usize,
    addresses: Vec<(ChannelId, SocketAddr)>,
    shut_down: bool,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        let sleeper = match Sleeper::new() {
            Ok(sleeper) => Some(sleeper),
            Err(err) => {
                warn!(%err, "sleep command unavailable");
                None
            }
        };

        Self {
            sleeper,
            ticks: 0,
            lan_messages: 0,
            asf_messages: 0,
            serial_bytes: 0,
            serial_peers: 0,
            addresses: Vec::new(),
            shut_down: false,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn lan_messages(&self) -> u64 {
        self.lan_messages
    }

    pub fn asf_messages(&self) -> u64 {
        self.asf_messages
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn status(&self) -> String {
        let mut text = format!(
            "ticks: {}\nmanagement messages: {}\nasf messages: {}\nserial bytes: {}\nserial peers: {}\n",
            self.ticks, self.lan_messages, self.asf_messages, self.serial_bytes, self.serial_peers
        );
        for (channel, addr) in &self.addresses {
            text.push_str(&format!("channel {channel} bound to {addr}\n"));
        }
        text
    }

    fn sleep(&self, out: &mut dyn ConsoleOutput, arg: Option<&str>) {
        let Some(millis) = arg.and_then(|a| a.parse::<u64>().ok()) else {
            out.print("usage: sleep <ms>\n");
            return;
        };
        let Some(sleeper) = &self.sleeper else {
            out.print("sleep is unavailable\n");
            return;
        };

        match sleeper.sleep(Duration::from_millis(millis)) {
            Ok(SleepOutcome::Elapsed) => {}
            Ok(SleepOutcome::Interrupted) => out.print("sleep interrupted\n"),
            Err(err) => out.print(&format!("sleep failed: {err}\n")),
        }
    }
}

impl Default for DiagnosticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for DiagnosticEngine {
    fn handle_message(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        trace!(?request, "management request left unanswered");
        None
    }

    fn handle_lan(
        &mut self,
        channel: ChannelId,
        class: LanClass,
        packet: &[u8],
        source: SocketAddr,
        _reply: &LanSender,
    ) {
        match class {
            LanClass::Asf => self.asf_messages += 1,
            LanClass::Management => self.lan_messages += 1,
        }
        debug!(%channel, ?class, %source, len = packet.len(), "LAN message");
        let _ = self.handle_message(packet);
    }

    fn lan_address(&mut self, channel: ChannelId, index: usize, addr: SocketAddr) {
        info!(%channel, index, %addr, "LAN address bound");
        self.addresses.push((channel, addr));
    }

    fn handle_serial(&mut self, channel: ChannelId, data: &[u8], _port: &SerialSender) {
        self.serial_bytes += data.len() as u64;
        debug!(%channel, len = data.len(), "serial data");
    }

    fn serial_connected(&mut self, channel: ChannelId, _port: &SerialSender) {
        self.serial_peers += 1;
        info!(%channel, "serial peer connected");
    }

    fn serial_disconnected(&mut self, channel: ChannelId) {
        self.serial_peers = self.serial_peers.saturating_sub(1);
        info!(%channel, "serial peer disconnected");
    }

    fn tick(&mut self, elapsed_seconds: u32) {
        self.ticks += u64::from(elapsed_seconds);
    }

    fn dispatch_command(&mut self, out: &mut dyn ConsoleOutput, command: &[u8]) -> CommandStatus {
        let command = String::from_utf8_lossy(command);
        let mut words = command.split_whitespace();
        match words.next() {
            Some("help") => out.print(HELP),
            Some("status") => out.print(&self.status()),
            Some("sleep") => self.sleep(out, words.next()),
            Some("quit") => return CommandStatus::Shutdown,
            Some(other) => out.print(&format!("unknown command: {other}\n")),
            None => {}
        }
        CommandStatus::Continue
    }

    fn shutdown(&mut self) {
        if !self.shut_down {
            info!(ticks = self.ticks, "simulator shutting down");
        }
        self.shut_down = true;
    }
}
