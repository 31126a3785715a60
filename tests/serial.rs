use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::time::Duration;

use bmcsim::Reactor;
use bmcsim::channel::{ChannelId, SerialChannel, SerialConfig, SerialMode, SerialSender};
use bmcsim::console::ConsoleOutput;
use bmcsim::engine::{CommandStatus, Engine, SharedEngine};

#[derive(Default)]
struct Link {
    connected: usize,
    disconnected: usize,
    received: Vec<u8>,
}

impl Engine for Link {
    fn handle_message(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        self.received.extend_from_slice(request);
        Some(request.iter().rev().copied().collect())
    }

    fn serial_connected(&mut self, _channel: ChannelId, port: &SerialSender) {
        assert!(port.is_connected());
        self.connected += 1;
    }

    fn serial_disconnected(&mut self, _channel: ChannelId) {
        self.disconnected += 1;
    }

    fn tick(&mut self, _elapsed_seconds: u32) {}

    fn dispatch_command(&mut self, _out: &mut dyn ConsoleOutput, _command: &[u8]) -> CommandStatus {
        CommandStatus::Continue
    }
}

fn listening(reactor: &mut Reactor) -> (SerialChannel, Rc<RefCell<Link>>) {
    let link = Rc::new(RefCell::new(Link::default()));
    let engine: SharedEngine = link.clone();
    let config = SerialConfig {
        address: "127.0.0.1:0".parse().unwrap(),
        mode: SerialMode::Listen,
    };
    let channel = SerialChannel::open(reactor, ChannelId(1), &config, engine).unwrap();
    (channel, link)
}

fn connect(channel: &SerialChannel) -> TcpStream {
    let stream = TcpStream::connect(channel.local_addr().unwrap()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    stream
}

fn step(reactor: &mut Reactor) {
    reactor.run_once(Some(Duration::from_secs(1))).unwrap();
}

#[test]
fn test_single_peer_accepted() {
    let mut reactor = Reactor::new().unwrap();
    let (channel, link) = listening(&mut reactor);

    let _first = connect(&channel);
    step(&mut reactor);
    assert!(channel.is_connected());
    assert_eq!(link.borrow().connected, 1);

    let mut second = connect(&channel);
    step(&mut reactor);

    let mut buf = [0u8; 8];
    assert_eq!(second.read(&mut buf).unwrap(), 0);
    assert_eq!(link.borrow().connected, 1);
    assert!(channel.is_connected());
}

#[test]
fn test_peer_data_reaches_engine_and_reply_returns() {
    let mut reactor = Reactor::new().unwrap();
    let (channel, link) = listening(&mut reactor);

    let mut peer = connect(&channel);
    step(&mut reactor);

    peer.write_all(b"abc").unwrap();
    while link.borrow().received.len() < 3 {
        step(&mut reactor);
    }
    assert_eq!(link.borrow().received, b"abc");

    let mut buf = [0u8; 3];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"cba");
}

#[test]
fn test_disconnect_notified_exactly_once() {
    let mut reactor = Reactor::new().unwrap();
    let (channel, link) = listening(&mut reactor);

    let peer = connect(&channel);
    step(&mut reactor);
    drop(peer);

    while link.borrow().disconnected == 0 {
        step(&mut reactor);
    }
    assert!(!channel.is_connected());

    reactor.run_once(Some(Duration::from_millis(30))).unwrap();
    assert_eq!(link.borrow().disconnected, 1);

    // The listener keeps accepting after a disconnect.
    let _again = connect(&channel);
    step(&mut reactor);
    assert_eq!(link.borrow().connected, 2);
}

#[test]
fn test_send_without_peer_is_noop() {
    let mut reactor = Reactor::new().unwrap();
    let (channel, _link) = listening(&mut reactor);

    assert!(!channel.sender().is_connected());
    assert!(channel.sender().send_bytes(b"lost").is_ok());
}

#[test]
fn test_connect_mode_dials_out() {
    let mut reactor = Reactor::new().unwrap();
    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let link = Rc::new(RefCell::new(Link::default()));
    let engine: SharedEngine = link.clone();
    let config = SerialConfig {
        address: server.local_addr().unwrap(),
        mode: SerialMode::Connect,
    };

    let mut channel = SerialChannel::open(&mut reactor, ChannelId(2), &config, engine).unwrap();
    let (mut remote, _) = server.accept().unwrap();
    remote
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();

    assert_eq!(link.borrow().connected, 1);
    assert!(channel.local_addr().is_none());

    channel.sender().send_bytes(b"hello").unwrap();
    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    channel.close(&mut reactor);
    assert_eq!(reactor.registration_count(), 0);
    assert_eq!(link.borrow().disconnected, 0);
}

#[test]
fn test_connect_failure_is_fatal_setup_error() {
    let mut reactor = Reactor::new().unwrap();
    let address = {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        server.local_addr().unwrap()
    };
    let engine: SharedEngine = Rc::new(RefCell::new(Link::default()));
    let config = SerialConfig {
        address,
        mode: SerialMode::Connect,
    };

    let err = SerialChannel::open(&mut reactor, ChannelId(0), &config, engine)
        .err()
        .unwrap();
    assert!(err.is_fatal_at_setup());
}
