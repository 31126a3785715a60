use std::cell::RefCell;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use bmcsim::SimError;
use bmcsim::reactor::{EventSource, Reactor, RegistrationId, RunStatus, TimeVal};

fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0i32; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(res, 0, "pipe() failed");
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

fn write_byte(fd: &OwnedFd) {
    let buf = [1u8; 1];
    let wrote = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr() as *const _, 1) };
    assert_eq!(wrote, 1);
}

fn drain(fd: RawFd) {
    let mut buf = [0u8; 16];
    unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
}

type Log = Rc<RefCell<Vec<String>>>;

struct Recording {
    name: &'static str,
    log: Log,
    remove: Option<Rc<RefCell<Option<RegistrationId>>>>,
}

impl EventSource for Recording {
    fn ready(&mut self, reactor: &mut Reactor, fd: RawFd, id: RegistrationId) {
        drain(fd);
        self.log.borrow_mut().push(format!("ready {}", self.name));
        if let Some(target) = &self.remove {
            let target = target.borrow_mut().take().unwrap_or(id);
            reactor.deregister(target).unwrap();
            self.log.borrow_mut().push(format!("deregistered by {}", self.name));
        }
    }

    fn freed(&mut self, _fd: RawFd) {
        self.log.borrow_mut().push(format!("freed {}", self.name));
    }
}

#[test]
fn test_readable_descriptor_dispatches() {
    let mut reactor = Reactor::new().unwrap();
    let (rx, tx) = pipe();
    let seen = Rc::new(RefCell::new(None));
    let seen2 = seen.clone();

    reactor
        .register(
            rx.as_raw_fd(),
            move |_: &mut Reactor, fd: RawFd, _: RegistrationId| {
                drain(fd);
                *seen2.borrow_mut() = Some(fd);
            },
        )
        .unwrap();

    write_byte(&tx);
    let status = reactor.run_once(Some(Duration::from_secs(1))).unwrap();

    assert_eq!(status, RunStatus::Ready);
    assert_eq!(*seen.borrow(), Some(rx.as_raw_fd()));
}

#[test]
fn test_idle_wait_times_out() {
    let mut reactor = Reactor::new().unwrap();
    let (rx, _tx) = pipe();
    reactor
        .register(rx.as_raw_fd(), |_: &mut Reactor, _: RawFd, _: RegistrationId| {
            panic!("nothing was written");
        })
        .unwrap();

    let status = reactor.run_once(Some(Duration::from_millis(20))).unwrap();
    assert_eq!(status, RunStatus::TimedOut);
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut reactor = Reactor::new().unwrap();
    let (rx, _tx) = pipe();
    let fd = rx.as_raw_fd();

    reactor
        .register(fd, |_: &mut Reactor, _: RawFd, _: RegistrationId| {})
        .unwrap();
    let err = reactor
        .register(fd, |_: &mut Reactor, _: RawFd, _: RegistrationId| {})
        .unwrap_err();

    assert!(matches!(err, SimError::DuplicateRegistration(d) if d == fd));
    assert_eq!(reactor.registration_count(), 1);
}

#[test]
fn test_deregister_from_own_callback_frees_after_return() {
    let mut reactor = Reactor::new().unwrap();
    let (rx, tx) = pipe();
    let log: Log = Rc::default();

    reactor
        .register(
            rx.as_raw_fd(),
            Recording {
                name: "a",
                log: log.clone(),
                remove: Some(Rc::new(RefCell::new(None))),
            },
        )
        .unwrap();

    write_byte(&tx);
    reactor.run_once(Some(Duration::from_secs(1))).unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["ready a", "deregistered by a", "freed a"]
    );
    assert!(!reactor.is_registered(rx.as_raw_fd()));

    // Never dispatched again, even though the descriptor stays readable.
    write_byte(&tx);
    let status = reactor.run_once(Some(Duration::from_millis(20))).unwrap();
    assert_eq!(status, RunStatus::TimedOut);
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn test_deregistered_peer_is_not_dispatched_in_same_step() {
    let mut reactor = Reactor::new().unwrap();
    let (rx_a, tx_a) = pipe();
    let (rx_b, tx_b) = pipe();
    let log: Log = Rc::default();
    let target = Rc::new(RefCell::new(None));

    let id_a = reactor
        .register(
            rx_a.as_raw_fd(),
            Recording {
                name: "a",
                log: log.clone(),
                remove: Some(target.clone()),
            },
        )
        .unwrap();
    let id_b = reactor
        .register(
            rx_b.as_raw_fd(),
            Recording {
                name: "b",
                log: log.clone(),
                remove: Some(target.clone()),
            },
        )
        .unwrap();

    // Whichever runs first removes the other.
    *target.borrow_mut() = Some(id_b);
    write_byte(&tx_a);
    write_byte(&tx_b);
    reactor.run_once(Some(Duration::from_secs(1))).unwrap();

    let log = log.borrow();
    assert_eq!(log.iter().filter(|l| l.starts_with("ready")).count(), 1);
    assert_eq!(log.iter().filter(|l| *l == "freed b").count(), 1);
    assert!(reactor.is_registered(rx_a.as_raw_fd()));
    assert!(!reactor.is_registered(rx_b.as_raw_fd()));
    let _ = id_a;
}

#[test]
fn test_deregister_outside_dispatch_frees_immediately() {
    let mut reactor = Reactor::new().unwrap();
    let (rx, _tx) = pipe();
    let log: Log = Rc::default();

    let id = reactor
        .register(
            rx.as_raw_fd(),
            Recording {
                name: "a",
                log: log.clone(),
                remove: None,
            },
        )
        .unwrap();
    reactor.deregister(id).unwrap();

    assert_eq!(*log.borrow(), vec!["freed a"]);
    assert!(matches!(
        reactor.deregister(id),
        Err(SimError::UnknownRegistration)
    ));
}

#[test]
fn test_waker_interrupts_blocking_wait() {
    let mut reactor = Reactor::new().unwrap();
    let waker = reactor.waker();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wake();
    });

    let status = reactor.run_once(None).unwrap();
    handle.join().unwrap();

    assert_eq!(status, RunStatus::Interrupted);
}

#[test]
fn test_waker_stop_ends_run_forever() {
    let mut reactor = Reactor::new().unwrap();
    let waker = reactor.waker();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.stop();
    });

    reactor.run_forever().unwrap();
    handle.join().unwrap();
    assert!(reactor.is_stopped());
}

#[test]
fn test_waker_stop_before_run_forever_is_kept() {
    let mut reactor = Reactor::new().unwrap();
    let waker = reactor.waker();
    thread::spawn(move || waker.stop()).join().unwrap();

    let fired = Rc::new(RefCell::new(false));
    let fired2 = fired.clone();
    let fallback = reactor
        .alloc_timer(move |reactor, _| {
            *fired2.borrow_mut() = true;
            reactor.stop();
        })
        .unwrap();
    reactor.start_timer(fallback, Duration::from_millis(300)).unwrap();

    reactor.run_forever().unwrap();
    assert!(!*fired.borrow());

    // The stop was consumed; the next run lasts until the fallback fires.
    reactor.run_forever().unwrap();
    assert!(*fired.borrow());
}

#[test]
fn test_timer_fires_once_never_early() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let fired2 = fired.clone();

    let timer = reactor
        .alloc_timer(move |_, _| fired2.borrow_mut().push(TimeVal::now()))
        .unwrap();
    reactor.start_timer(timer, Duration::from_millis(30)).unwrap();
    let deadline = reactor.timer_deadline(timer).unwrap();

    while fired.borrow().is_empty() {
        reactor.run_once(Some(Duration::from_secs(1))).unwrap();
    }

    assert!(fired.borrow()[0] >= deadline);
    assert!(!reactor.timer_running(timer));

    let status = reactor.run_once(Some(Duration::from_millis(50))).unwrap();
    assert_eq!(status, RunStatus::TimedOut);
    assert_eq!(fired.borrow().len(), 1);
}

#[test]
fn test_start_running_timer_is_busy() {
    let mut reactor = Reactor::new().unwrap();
    let timer = reactor.alloc_timer(|_, _| {}).unwrap();

    reactor.start_timer(timer, Duration::from_secs(5)).unwrap();
    let err = reactor.start_timer(timer, Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, SimError::TimerBusy));
}

#[test]
fn test_stopped_timer_does_not_fire() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(0));
    let fired2 = fired.clone();
    let timer = reactor
        .alloc_timer(move |_, _| *fired2.borrow_mut() += 1)
        .unwrap();

    reactor.start_timer(timer, Duration::from_millis(10)).unwrap();
    reactor.stop_timer(timer).unwrap();
    reactor.stop_timer(timer).unwrap();

    let status = reactor.run_once(Some(Duration::from_millis(40))).unwrap();
    assert_eq!(status, RunStatus::TimedOut);
    assert_eq!(*fired.borrow(), 0);

    // A stopped timer can be started again.
    reactor.start_timer(timer, Duration::from_millis(1)).unwrap();
    while *fired.borrow() == 0 {
        reactor.run_once(Some(Duration::from_secs(1))).unwrap();
    }
}

#[test]
fn test_timer_can_rearm_and_stop_reactor() {
    let mut reactor = Reactor::new().unwrap();
    let count = Rc::new(RefCell::new(0));
    let count2 = count.clone();

    let timer = reactor
        .alloc_timer(move |reactor, id| {
            *count2.borrow_mut() += 1;
            if *count2.borrow() == 3 {
                reactor.stop();
            } else {
                reactor.start_timer(id, Duration::from_millis(5)).unwrap();
            }
        })
        .unwrap();
    reactor.start_timer(timer, Duration::from_millis(5)).unwrap();

    reactor.run_forever().unwrap();
    assert_eq!(*count.borrow(), 3);
}

#[test]
fn test_descriptors_dispatch_before_timers() {
    let mut reactor = Reactor::new().unwrap();
    let (rx, tx) = pipe();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    reactor
        .register(rx.as_raw_fd(), move |_: &mut Reactor, fd: RawFd, _: RegistrationId| {
            drain(fd);
            o.borrow_mut().push("fd");
        })
        .unwrap();
    let o = order.clone();
    let timer = reactor.alloc_timer(move |_, _| o.borrow_mut().push("timer")).unwrap();

    reactor.start_timer(timer, TimeVal::ZERO).unwrap();
    write_byte(&tx);
    reactor.run_once(Some(Duration::from_secs(1))).unwrap();

    assert_eq!(*order.borrow(), vec!["fd", "timer"]);
}

#[test]
fn test_free_timer_from_its_callback() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(0));
    let fired2 = fired.clone();

    let timer = reactor
        .alloc_timer(move |reactor, id| {
            *fired2.borrow_mut() += 1;
            reactor.free_timer(id).unwrap();
        })
        .unwrap();
    reactor.start_timer(timer, Duration::from_millis(1)).unwrap();
    assert_eq!(reactor.timer_count(), 1);

    while *fired.borrow() == 0 {
        reactor.run_once(Some(Duration::from_secs(1))).unwrap();
    }

    assert_eq!(reactor.timer_count(), 0);
    assert!(matches!(
        reactor.start_timer(timer, Duration::from_millis(1)),
        Err(SimError::UnknownTimer)
    ));
}
