//! Serial channel: a serial-over-TCP link with at most one peer.
//!
//! In listen mode a second connection while a peer is active is accepted and
//! closed at once. A peer that hangs up or fails a read is disconnected
//! exactly once; the engine hears about it through
//! [`Engine::serial_disconnected`](crate::engine::Engine::serial_disconnected).

use crate::channel::{ChannelId, SerialConfig, SerialMode, configure_stream};
use crate::engine::SharedEngine;
use crate::error::{Result, SimError};
use crate::reactor::{EventSource, Reactor, RegistrationId};

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 256;

struct Peer {
    stream: Rc<TcpStream>,
    registration: RegistrationId,
}

#[derive(Default)]
struct SerialState {
    peer: Option<Peer>,
}

/// Writes to the channel's current peer.
#[derive(Clone)]
pub struct SerialSender {
    channel: ChannelId,
    state: Rc<RefCell<SerialState>>,
}

impl SerialSender {
    /// Sends `bytes` to the connected peer.
    ///
    /// Without a peer this does nothing and succeeds. A failed or short
    /// write is logged and reported, never retried.
    pub fn send_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let state = self.state.borrow();
        let Some(peer) = &state.peer else {
            return Ok(());
        };

        trace!(channel = %self.channel, ?bytes, "serial send");
        let result = match (&*peer.stream).write(bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(_) => Err(io::Error::from(io::ErrorKind::WriteZero)),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!(channel = %self.channel, %err, "serial send failed");
        }
        result
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().peer.is_some()
    }
}

pub struct SerialChannel {
    id: ChannelId,
    sender: SerialSender,
    listener: Option<(RegistrationId, SocketAddr)>,
}

impl SerialChannel {
    /// Connects to, or starts listening on, the configured address.
    pub fn open(
        reactor: &mut Reactor,
        id: ChannelId,
        config: &SerialConfig,
        engine: SharedEngine,
    ) -> Result<Self> {
        let state = Rc::new(RefCell::new(SerialState::default()));
        let sender = SerialSender {
            channel: id,
            state: state.clone(),
        };

        let listener = match config.mode {
            SerialMode::Connect => {
                let stream = TcpStream::connect(config.address).map_err(|err| {
                    SimError::setup(format!("unable to connect to {}", config.address), err)
                })?;
                stream
                    .set_nonblocking(true)
                    .map_err(|err| SimError::setup("unable to configure serial socket", err))?;

                attach_peer(reactor, id, &sender, &engine, stream)?;
                None
            }
            SerialMode::Listen => {
                let listener = TcpListener::bind(config.address).map_err(|err| {
                    SimError::setup(format!("unable to listen on {}", config.address), err)
                })?;
                listener
                    .set_nonblocking(true)
                    .map_err(|err| SimError::setup("unable to configure serial listener", err))?;
                let local = listener.local_addr()?;

                let fd = listener.as_raw_fd();
                let registration = reactor.register(
                    fd,
                    ListenSource {
                        channel: id,
                        listener,
                        sender: sender.clone(),
                        engine,
                    },
                )?;
                debug!(channel = %id, %local, "serial channel listening");
                Some((registration, local))
            }
        };

        Ok(Self {
            id,
            sender,
            listener,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn sender(&self) -> &SerialSender {
        &self.sender
    }

    /// Address the listener is bound to, in listen mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.map(|(_, addr)| addr)
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Drops the peer and the listener without notifying the engine.
    pub fn close(&mut self, reactor: &mut Reactor) {
        let peer = self.sender.state.borrow_mut().peer.take();
        if let Some(peer) = peer {
            let _ = reactor.deregister(peer.registration);
        }
        if let Some((registration, _)) = self.listener.take() {
            let _ = reactor.deregister(registration);
        }
    }
}

fn attach_peer(
    reactor: &mut Reactor,
    channel: ChannelId,
    sender: &SerialSender,
    engine: &SharedEngine,
    stream: TcpStream,
) -> Result<()> {
    let stream = Rc::new(stream);
    let registration = reactor.register(
        stream.as_raw_fd(),
        PeerSource {
            channel,
            stream: stream.clone(),
            sender: sender.clone(),
            engine: engine.clone(),
        },
    )?;

    sender.state.borrow_mut().peer = Some(Peer {
        stream,
        registration,
    });
    engine.borrow_mut().serial_connected(channel, sender);

    Ok(())
}

struct ListenSource {
    channel: ChannelId,
    listener: TcpListener,
    sender: SerialSender,
    engine: SharedEngine,
}

impl EventSource for ListenSource {
    fn ready(&mut self, reactor: &mut Reactor, _fd: RawFd, _id: RegistrationId) {
        let (stream, addr) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return;
            }
            Err(err) => {
                warn!(channel = %self.channel, %err, "serial accept failed");
                return;
            }
        };

        if self.sender.is_connected() {
            debug!(channel = %self.channel, %addr, "serial peer already active, closing");
            return;
        }

        if let Err(err) = configure_stream(&stream) {
            warn!(channel = %self.channel, %addr, %err, "unable to configure serial peer");
            return;
        }

        match attach_peer(reactor, self.channel, &self.sender, &self.engine, stream) {
            Ok(()) => debug!(channel = %self.channel, %addr, "serial peer accepted"),
            Err(err) => warn!(channel = %self.channel, %addr, %err, "unable to watch serial peer"),
        }
    }
}

struct PeerSource {
    channel: ChannelId,
    stream: Rc<TcpStream>,
    sender: SerialSender,
    engine: SharedEngine,
}

impl PeerSource {
    fn disconnect(&mut self, reactor: &mut Reactor, id: RegistrationId) {
        let peer = {
            let mut state = self.sender.state.borrow_mut();
            match &state.peer {
                Some(peer) if peer.registration == id => state.peer.take(),
                _ => None,
            }
        };
        let Some(peer) = peer else {
            return;
        };

        debug!(channel = %self.channel, "serial peer disconnected");
        self.engine.borrow_mut().serial_disconnected(self.channel);
        let _ = reactor.deregister(peer.registration);
    }
}

impl EventSource for PeerSource {
    fn ready(&mut self, reactor: &mut Reactor, fd: RawFd, id: RegistrationId) {
        let mut buf = [0u8; READ_CHUNK];

        match (&*self.stream).read(&mut buf) {
            Ok(0) => self.disconnect(reactor, id),
            Ok(n) => {
                trace!(channel = %self.channel, data = ?&buf[..n], "serial receive");
                self.engine
                    .borrow_mut()
                    .handle_serial(self.channel, &buf[..n], &self.sender);
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                debug!(channel = %self.channel, fd, %err, "serial read failed");
                self.disconnect(reactor, id);
            }
        }
    }

    fn freed(&mut self, fd: RawFd) {
        trace!(channel = %self.channel, fd, "serial peer released");
    }
}
