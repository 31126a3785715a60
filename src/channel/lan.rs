//! LAN channel: management datagrams over UDP.
//!
//! A datagram is accepted only if it is at least [`MIN_PACKET_LEN`] bytes
//! long and starts with [`RMCP_VERSION`]. The class byte then routes it to
//! the ASF or the management path; anything else is dropped without a reply.

use crate::channel::ChannelId;
use crate::engine::{LanClass, SharedEngine};
use crate::error::{Result, SimError};
use crate::reactor::{EventSource, Reactor, RegistrationId};

use std::io;
use std::net::{Ipv6Addr, SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, trace, warn};

pub const MAX_LAN_ADDRS: usize = 4;
pub const DEFAULT_LAN_PORT: u16 = 623;

/// Required value of the first header byte.
pub const RMCP_VERSION: u8 = 6;
pub const MIN_PACKET_LEN: usize = 4;

const CLASS_OFFSET: usize = 3;
const CLASS_ASF: u8 = 6;
const CLASS_MANAGEMENT: u8 = 7;

const RECV_BUFFER_LEN: usize = 256;

/// Validates a datagram header and returns its protocol family.
///
/// # Example
/// ```ignore
/// assert_eq!(classify(&[6, 0, 0xff, 7]), Some(LanClass::Management));
/// assert_eq!(classify(&[5, 0, 0xff, 7]), None);
/// ```
pub fn classify(packet: &[u8]) -> Option<LanClass> {
    if packet.len() < MIN_PACKET_LEN || packet[0] != RMCP_VERSION {
        return None;
    }

    match packet[CLASS_OFFSET] {
        CLASS_ASF => Some(LanClass::Asf),
        CLASS_MANAGEMENT => Some(LanClass::Management),
        _ => None,
    }
}

/// Sends replies out of one bound LAN socket.
#[derive(Clone)]
pub struct LanSender {
    socket: Rc<UdpSocket>,
}

impl LanSender {
    /// Sends one datagram to `dest`.
    ///
    /// A `None` destination suppresses the send and succeeds. A failed send
    /// is logged and reported, never retried.
    pub fn send_bytes(&self, dest: Option<&SocketAddr>, bytes: &[u8]) -> io::Result<()> {
        let Some(dest) = dest else {
            return Ok(());
        };

        trace!(%dest, ?bytes, "LAN send");
        match self.socket.send_to(bytes, dest) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(%dest, %err, "LAN send failed");
                Err(err)
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

struct LanSocket {
    sender: LanSender,
    registration: RegistrationId,
}

/// A LAN channel bound on up to [`MAX_LAN_ADDRS`] local addresses.
pub struct LanChannel {
    id: ChannelId,
    sockets: Vec<LanSocket>,
}

impl LanChannel {
    /// Binds every configured address and registers it for read readiness.
    ///
    /// An empty address list binds the IPv6 wildcard on [`DEFAULT_LAN_PORT`].
    pub fn open(
        reactor: &mut Reactor,
        id: ChannelId,
        config: &crate::channel::LanConfig,
        engine: SharedEngine,
    ) -> Result<Self> {
        if config.addresses.len() > MAX_LAN_ADDRS {
            return Err(SimError::Config(format!(
                "channel {id}: at most {MAX_LAN_ADDRS} LAN addresses are allowed"
            )));
        }

        let addresses = if config.addresses.is_empty() {
            vec![SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_LAN_PORT))]
        } else {
            config.addresses.clone()
        };

        let mut channel = LanChannel {
            id,
            sockets: Vec::with_capacity(addresses.len()),
        };

        for (index, addr) in addresses.iter().enumerate() {
            let socket = match bind(addr) {
                Ok(socket) => Rc::new(socket),
                Err(err) => {
                    channel.close(reactor);
                    return Err(SimError::setup(
                        format!("unable to bind to LAN address {addr}"),
                        err,
                    ));
                }
            };
            let local = socket.local_addr()?;
            let sender = LanSender { socket };

            let source = LanSource {
                channel: id,
                sender: sender.clone(),
                engine: engine.clone(),
            };
            let registration = match reactor.register(sender.socket.as_raw_fd(), source) {
                Ok(registration) => registration,
                Err(err) => {
                    channel.close(reactor);
                    return Err(err);
                }
            };
            channel.sockets.push(LanSocket {
                sender: sender.clone(),
                registration,
            });

            debug!(channel = %id, %local, "LAN socket bound");
            engine.borrow_mut().lan_address(id, index, local);
        }

        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// One sender per bound address, in configuration order.
    pub fn senders(&self) -> impl Iterator<Item = &LanSender> {
        self.sockets.iter().map(|s| &s.sender)
    }

    pub fn close(&mut self, reactor: &mut Reactor) {
        for socket in self.sockets.drain(..) {
            let _ = reactor.deregister(socket.registration);
        }
    }
}

fn bind(addr: &SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

struct LanSource {
    channel: ChannelId,
    sender: LanSender,
    engine: SharedEngine,
}

impl EventSource for LanSource {
    fn ready(&mut self, _reactor: &mut Reactor, fd: RawFd, _id: RegistrationId) {
        let mut buf = [0u8; RECV_BUFFER_LEN];

        let (len, source) = match self.sender.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return;
            }
            Err(err) => {
                warn!(channel = %self.channel, fd, %err, "LAN receive failed");
                return;
            }
        };

        let packet = &buf[..len];
        trace!(channel = %self.channel, %source, ?packet, "LAN receive");

        let Some(class) = classify(packet) else {
            debug!(channel = %self.channel, %source, len, "dropped invalid LAN datagram");
            return;
        };

        self.engine
            .borrow_mut()
            .handle_lan(self.channel, class, packet, source, &self.sender);
    }

    fn freed(&mut self, fd: RawFd) {
        trace!(channel = %self.channel, fd, "LAN socket released");
    }
}
