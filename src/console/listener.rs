//! Console input plumbing: the TCP console listener, the stdio console and
//! the reactor source that feeds a session.

use crate::channel::configure_stream;
use crate::console::output::{ConsoleOutput, SocketOutput};
use crate::console::registry::{ConsoleRegistry, SessionKey};
use crate::console::session::{ConsoleSession, PROMPT, SessionEvent};
use crate::console::telnet::INITIAL_NEGOTIATION;
use crate::engine::SharedEngine;
use crate::error::{Result, SimError};
use crate::reactor::{EventSource, Reactor, RegistrationId};

use std::cell::RefCell;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64;

pub const OUT_OF_MEMORY: &[u8] = b"Out of memory\n";
pub const UNABLE_TO_WAIT: &[u8] = b"Unable to add socket wait\n";

/// Registry and engine every console source works against.
#[derive(Clone)]
pub struct ConsoleHub {
    registry: Rc<RefCell<ConsoleRegistry>>,
    engine: SharedEngine,
}

impl ConsoleHub {
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            registry: Rc::new(RefCell::new(ConsoleRegistry::new())),
            engine,
        }
    }

    pub fn registry(&self) -> &Rc<RefCell<ConsoleRegistry>> {
        &self.registry
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn session_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Starts a telnet session on an accepted connection.
    ///
    /// Failures are reported to the peer and close the connection; they
    /// never reach the caller.
    pub fn open_network_session(&self, reactor: &mut Reactor, stream: TcpStream) {
        let stream = Rc::new(stream);

        let inserted = {
            let mut registry = self.registry.borrow_mut();
            registry.reserve().and_then(|()| {
                registry.insert(ConsoleSession::telnet(Box::new(SocketOutput::new(
                    stream.clone(),
                ))))
            })
        };
        let key = match inserted {
            Ok(key) => key,
            Err(err) => {
                warn!(%err, "unable to allocate console session");
                let mut out = SocketOutput::new(stream);
                out.write_raw(OUT_OF_MEMORY);
                out.close();
                return;
            }
        };

        let source = ConsoleSource {
            key,
            input: ConsoleInput::Stream(stream.clone()),
            hub: self.clone(),
        };
        let mut registry = self.registry.borrow_mut();
        match reactor.register(stream.as_raw_fd(), source) {
            Ok(registration) => registry.attach(key, registration),
            Err(err) => {
                warn!(%err, "unable to watch console connection");
                if let Some(session) = registry.session_mut(key) {
                    session.output().write_raw(UNABLE_TO_WAIT);
                }
                registry.remove(reactor, key);
                return;
            }
        }

        if let Some(session) = registry.session_mut(key) {
            let out = session.output();
            out.write_raw(&INITIAL_NEGOTIATION);
            out.write_raw(PROMPT);
        }
        debug!(sessions = registry.len(), "console session opened");
    }

    /// Starts the controlling console on `fd`, writing through `out`.
    ///
    /// Closing this session stops the simulator.
    pub fn open_stdio_session(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        out: Box<dyn ConsoleOutput>,
    ) -> Result<SessionKey> {
        let mut registry = self.registry.borrow_mut();
        let key = registry.insert(ConsoleSession::raw(out, true))?;

        let source = ConsoleSource {
            key,
            input: ConsoleInput::Fd(fd),
            hub: self.clone(),
        };
        match reactor.register(fd, source) {
            Ok(registration) => registry.attach(key, registration),
            Err(err) => {
                registry.remove(reactor, key);
                return Err(err);
            }
        }

        if let Some(session) = registry.session_mut(key) {
            session.output().write_raw(PROMPT);
        }
        Ok(key)
    }

    /// Removes every session. Used once, on teardown.
    pub fn shutdown_all(&self, reactor: &mut Reactor) {
        self.registry.borrow_mut().shutdown_all(reactor);
    }

    fn request_shutdown(&self, reactor: &mut Reactor) {
        info!("console requested shutdown");
        self.engine.borrow_mut().shutdown();
        reactor.stop();
    }
}

/// Accepts network console connections.
pub struct ConsoleListener {
    registration: Option<RegistrationId>,
    local: SocketAddr,
}

impl ConsoleListener {
    pub fn bind(reactor: &mut Reactor, addr: SocketAddr, hub: ConsoleHub) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|err| {
            SimError::setup(format!("unable to listen on console address {addr}"), err)
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|err| SimError::setup("unable to configure console listener", err))?;
        let local = listener.local_addr()?;

        let fd = listener.as_raw_fd();
        let registration = reactor.register(fd, ListenSource { listener, hub })?;
        info!(%local, "console listening");

        Ok(Self {
            registration: Some(registration),
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn close(&mut self, reactor: &mut Reactor) {
        if let Some(registration) = self.registration.take() {
            let _ = reactor.deregister(registration);
        }
    }
}

struct ListenSource {
    listener: TcpListener,
    hub: ConsoleHub,
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
                warn!(%err, "console accept failed");
                return;
            }
        };

        if let Err(err) = configure_stream(&stream) {
            warn!(%addr, %err, "unable to configure console connection");
            return;
        }

        debug!(%addr, "console connection accepted");
        self.hub.open_network_session(reactor, stream);
    }
}

enum ConsoleInput {
    Stream(Rc<TcpStream>),
    Fd(RawFd),
}

impl ConsoleInput {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ConsoleInput::Stream(stream) => (&**stream).read(buf),
            ConsoleInput::Fd(fd) => {
                let n = unsafe { libc::read(*fd, buf.as_mut_ptr().cast(), buf.len()) };
                if n < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(n as usize)
            }
        }
    }
}

struct ConsoleSource {
    key: SessionKey,
    input: ConsoleInput,
    hub: ConsoleHub,
}

impl ConsoleSource {
    fn end(&mut self, reactor: &mut Reactor) {
        let controlling = self
            .hub
            .registry
            .borrow_mut()
            .session_mut(self.key)
            .map(|s| s.shutdown_on_close());

        match controlling {
            None => {}
            Some(true) => self.hub.request_shutdown(reactor),
            Some(false) => self.hub.registry.borrow_mut().remove(reactor, self.key),
        }
    }
}

impl EventSource for ConsoleSource {
    fn ready(&mut self, reactor: &mut Reactor, fd: RawFd, _id: RegistrationId) {
        let mut buf = [0u8; READ_CHUNK];

        let n = match self.input.read(&mut buf) {
            Ok(0) => return self.end(reactor),
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return;
            }
            Err(err) => {
                debug!(fd, %err, "console read failed");
                return self.end(reactor);
            }
        };

        let event = {
            let mut registry = self.hub.registry.borrow_mut();
            let Some(session) = registry.session_mut(self.key) else {
                return;
            };
            let mut engine = self.hub.engine.borrow_mut();
            session.feed(&buf[..n], &mut *engine)
        };

        match event {
            SessionEvent::Continue => {}
            SessionEvent::Close => self.end(reactor),
            SessionEvent::Shutdown => self.hub.request_shutdown(reactor),
        }
    }
}
