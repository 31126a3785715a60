//! Simulator context: every channel, console and timer the core owns.
//!
//! [`Simulator::start`] brings the transports up on a reactor; the caller
//! then drives the reactor and finally calls [`Simulator::teardown`].

use crate::channel::{Channel, ChannelId};
use crate::config::SimConfig;
use crate::console::{
    ConsoleHub, ConsoleListener, ConsoleOutput, NullOutput, SessionKey, StdoutOutput,
    TerminalGuard,
};
use crate::engine::{CommandStatus, SharedEngine};
use crate::error::{Result, SimError};
use crate::reactor::Reactor;
use crate::tick::PeriodicTick;

use std::fs;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::Path;
use tracing::{debug, info};

const STDIN_FD: RawFd = 0;

#[derive(Clone, Copy, Debug, Default)]
pub struct SimOptions {
    /// Leave the process's terminal alone and discard console output.
    pub nostdio: bool,
}

pub struct Simulator {
    engine: SharedEngine,
    hub: ConsoleHub,
    channels: Vec<Channel>,
    listener: Option<ConsoleListener>,
    terminal: Option<TerminalGuard>,
    stdio: Option<SessionKey>,
    command_out: Box<dyn ConsoleOutput>,
    tick: Option<PeriodicTick>,
    torn_down: bool,
}

impl Simulator {
    /// Opens every configured channel, the console listener, the stdio
    /// console and the periodic tick.
    ///
    /// Any failure undoes what was already set up and is returned; there is
    /// no partial startup.
    pub fn start(
        reactor: &mut Reactor,
        config: &SimConfig,
        engine: SharedEngine,
        options: SimOptions,
    ) -> Result<Self> {
        config.validate()?;

        let command_out: Box<dyn ConsoleOutput> = if options.nostdio {
            Box::new(NullOutput)
        } else {
            Box::new(StdoutOutput)
        };
        let mut sim = Simulator {
            hub: ConsoleHub::new(engine.clone()),
            engine,
            channels: Vec::with_capacity(config.channels.len()),
            listener: None,
            terminal: None,
            stdio: None,
            command_out,
            tick: None,
            torn_down: false,
        };

        if let Err(err) = sim.bring_up(reactor, config, options) {
            sim.teardown(reactor);
            return Err(err);
        }

        Ok(sim)
    }

    fn bring_up(
        &mut self,
        reactor: &mut Reactor,
        config: &SimConfig,
        options: SimOptions,
    ) -> Result<()> {
        for (index, channel) in config.channels.iter().enumerate() {
            let channel = Channel::open(reactor, ChannelId(index), channel, self.engine.clone())?;
            self.channels.push(channel);
        }

        if let Some(addr) = config.console {
            self.listener = Some(ConsoleListener::bind(reactor, addr, self.hub.clone())?);
        }

        if !options.nostdio {
            self.attach_stdio(reactor, STDIN_FD, Box::new(StdoutOutput))?;
        }

        let lan_channels = self
            .channels
            .iter()
            .filter(|c| c.is_lan())
            .map(|c| c.id())
            .collect();
        self.tick = Some(PeriodicTick::start(reactor, lan_channels, self.engine.clone())?);

        info!(
            channels = self.channels.len(),
            console = ?self.console_addr(),
            "simulator started"
        );
        Ok(())
    }

    /// Makes `fd` the controlling console.
    ///
    /// The descriptor stays blocking: on a terminal it usually shares its
    /// file description with stdout, and it is only read after poll reports
    /// it readable.
    fn attach_stdio(
        &mut self,
        reactor: &mut Reactor,
        fd: RawFd,
        out: Box<dyn ConsoleOutput>,
    ) -> Result<()> {
        let terminal = TerminalGuard::raw(fd)
            .map_err(|err| SimError::setup("unable to set up the terminal", err))?;
        self.terminal = Some(terminal);

        self.stdio = Some(self.hub.open_stdio_session(reactor, fd, out)?);
        Ok(())
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn consoles(&self) -> &ConsoleHub {
        &self.hub
    }

    /// The controlling console, unless running without stdio.
    pub fn stdio_session(&self) -> Option<SessionKey> {
        self.stdio
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Bound address of the console listener, if one was configured.
    pub fn console_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr())
    }

    pub fn ticks(&self) -> u64 {
        self.tick.as_ref().map_or(0, |t| t.ticks())
    }

    /// Runs one console command, writing its output to the stdio console.
    pub fn run_command(&mut self, command: &str) -> CommandStatus {
        debug!(command, "startup command");
        self.engine
            .borrow_mut()
            .dispatch_command(self.command_out.as_mut(), command.as_bytes())
    }

    /// Runs each line of `path` as a console command.
    ///
    /// Blank lines and lines starting with `#` are skipped. Stops at the
    /// first command that asks for shutdown.
    pub fn run_command_file(&mut self, path: impl AsRef<Path>) -> Result<CommandStatus> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| {
            SimError::Config(format!("failed to read command file {}: {err}", path.display()))
        })?;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if self.run_command(line) == CommandStatus::Shutdown {
                return Ok(CommandStatus::Shutdown);
            }
        }

        Ok(CommandStatus::Continue)
    }

    /// Closes every session, listener and channel and restores the terminal.
    /// Only the first call does anything.
    pub fn teardown(&mut self, reactor: &mut Reactor) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut tick) = self.tick.take() {
            tick.cancel(reactor);
        }
        self.hub.shutdown_all(reactor);
        self.stdio = None;
        if let Some(mut listener) = self.listener.take() {
            listener.close(reactor);
        }
        for channel in &mut self.channels {
            channel.close(reactor);
        }
        if let Some(mut terminal) = self.terminal.take() {
            terminal.restore();
        }

        debug!("simulator torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}
