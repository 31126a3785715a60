//! Transport channels: LAN datagram sockets and the serial TCP link.
//!
//! Each channel owns its sockets and their reactor registrations, and hands
//! validated traffic to the shared engine. Sockets are non-blocking and only
//! read readiness is ever monitored.

pub mod lan;
pub mod serial;

pub use lan::{LanChannel, LanSender};
pub use serial::{SerialChannel, SerialSender};

use crate::engine::SharedEngine;
use crate::error::Result;
use crate::reactor::Reactor;

use serde::Deserialize;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;

/// Upper bound on configured channels.
pub const MAX_CHANNELS: usize = 16;

/// Position of a channel in the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `[[channel]]` table of the configuration file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "medium", rename_all = "lowercase")]
pub enum ChannelConfig {
    Lan(LanConfig),
    Serial(SerialConfig),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct LanConfig {
    /// Local addresses to bind; empty means the wildcard address on the default port.
    #[serde(default)]
    pub addresses: Vec<SocketAddr>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SerialConfig {
    pub address: SocketAddr,
    #[serde(default)]
    pub mode: SerialMode,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SerialMode {
    /// Dial out to `address` once at startup.
    Connect,
    /// Accept one peer at a time on `address`.
    #[default]
    Listen,
}

/// An open transport channel.
pub enum Channel {
    Lan(LanChannel),
    Serial(SerialChannel),
}

impl Channel {
    /// Opens the sockets for `config`. Any failure here is fatal at startup.
    pub fn open(
        reactor: &mut Reactor,
        id: ChannelId,
        config: &ChannelConfig,
        engine: SharedEngine,
    ) -> Result<Self> {
        Ok(match config {
            ChannelConfig::Lan(lan) => Channel::Lan(LanChannel::open(reactor, id, lan, engine)?),
            ChannelConfig::Serial(serial) => {
                Channel::Serial(SerialChannel::open(reactor, id, serial, engine)?)
            }
        })
    }

    pub fn id(&self) -> ChannelId {
        match self {
            Channel::Lan(lan) => lan.id(),
            Channel::Serial(serial) => serial.id(),
        }
    }

    pub fn is_lan(&self) -> bool {
        matches!(self, Channel::Lan(_))
    }

    /// Deregisters and closes every socket of the channel.
    pub fn close(&mut self, reactor: &mut Reactor) {
        match self {
            Channel::Lan(lan) => lan.close(reactor),
            Channel::Serial(serial) => serial.close(reactor),
        }
    }
}

/// Applies the options every accepted stream gets: no Nagle delay,
/// keepalive probes, and non-blocking reads.
pub(crate) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let on: libc::c_int = 1;
    let rv = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error());
    }

    stream.set_nonblocking(true)
}
