use crate::error::{Result, SimError};
use crate::reactor::poller::Poller;
use crate::reactor::time::TimeVal;
use crate::reactor::timer::{TimerId, TimerTable};
use crate::reactor::wake::{ReactorWaker, WakePipe};
use crate::utils::slab::Slab;

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{error, trace};

/// Something that wants to hear about read readiness on one descriptor.
///
/// `ready` runs on the reactor thread and is never re-entered for the same
/// registration. `freed` runs exactly once, after deregistration, at a point
/// where no further `ready` call can reference the source.
pub trait EventSource {
    fn ready(&mut self, reactor: &mut Reactor, fd: RawFd, id: RegistrationId);

    fn freed(&mut self, _fd: RawFd) {}
}

impl<F> EventSource for F
where
    F: FnMut(&mut Reactor, RawFd, RegistrationId),
{
    fn ready(&mut self, reactor: &mut Reactor, fd: RawFd, id: RegistrationId) {
        self(reactor, fd, id)
    }
}

/// Handle to a live descriptor registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationId {
    slot: usize,
    serial: u64,
}

/// Outcome of one [`Reactor::run_once`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// At least one readiness or timer callback was dispatched.
    Ready,
    /// The timeout elapsed with nothing to dispatch.
    TimedOut,
    /// Another thread woke the reactor, or the wait was interrupted by a signal.
    Interrupted,
}

struct Registration {
    serial: u64,
    fd: RawFd,
    // `None` while the source is lent out to its own callback.
    source: Option<Box<dyn EventSource>>,
    removed: bool,
}

/// Single-threaded readiness and timer dispatcher.
pub struct Reactor {
    poller: Poller,
    registrations: Slab<Registration>,
    by_fd: HashMap<RawFd, RegistrationId>,
    timers: TimerTable,
    wake: WakePipe,
    next_serial: u64,
    polled: Vec<RegistrationId>,
    pending_free: Vec<(RawFd, Box<dyn EventSource>)>,
    dispatching: bool,
    stopped: bool,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poller: Poller::new(),
            registrations: Slab::new(16),
            by_fd: HashMap::new(),
            timers: TimerTable::default(),
            wake: WakePipe::new()?,
            next_serial: 0,
            polled: Vec::new(),
            pending_free: Vec::new(),
            dispatching: false,
            stopped: false,
        })
    }

    /// Handle other threads use to interrupt a blocking wait.
    pub fn waker(&self) -> ReactorWaker {
        self.wake.waker()
    }

    /// Starts monitoring `fd` for read readiness.
    ///
    /// Write and exceptional readiness are never monitored. A descriptor has
    /// at most one live registration.
    pub fn register<S>(&mut self, fd: RawFd, source: S) -> Result<RegistrationId>
    where
        S: EventSource + 'static,
    {
        if self.by_fd.contains_key(&fd) {
            return Err(SimError::DuplicateRegistration(fd));
        }
        self.by_fd.try_reserve(1)?;

        self.next_serial += 1;
        let serial = self.next_serial;
        let slot = self.registrations.insert(Registration {
            serial,
            fd,
            source: Some(Box::new(source)),
            removed: false,
        })?;

        let id = RegistrationId { slot, serial };
        self.by_fd.insert(fd, id);
        trace!(fd, "registered descriptor");

        Ok(id)
    }

    /// Stops monitoring immediately.
    ///
    /// The source's `freed` hook runs once no callback can reach it: right
    /// away when called outside dispatch, otherwise after the callback that
    /// is currently running returns.
    pub fn deregister(&mut self, id: RegistrationId) -> Result<()> {
        let registration = self
            .registrations
            .get_mut(id.slot)
            .filter(|r| r.serial == id.serial && !r.removed)
            .ok_or(SimError::UnknownRegistration)?;

        registration.removed = true;
        let fd = registration.fd;
        let lent_out = registration.source.is_none();

        if self.by_fd.get(&fd) == Some(&id) {
            self.by_fd.remove(&fd);
        }

        if !lent_out
            && let Some(registration) = self.registrations.remove(id.slot)
            && let Some(source) = registration.source
        {
            self.pending_free.push((fd, source));
        }

        if !self.dispatching {
            self.release_pending();
        }
        trace!(fd, "deregistered descriptor");

        Ok(())
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.by_fd.contains_key(&fd)
    }

    pub fn registration_count(&self) -> usize {
        self.by_fd.len()
    }

    pub fn alloc_timer<F>(&mut self, on_expire: F) -> Result<TimerId>
    where
        F: FnMut(&mut Reactor, TimerId) + 'static,
    {
        self.timers.alloc(Box::new(on_expire))
    }

    /// Arms `id` to expire once, `timeout` from now.
    ///
    /// Fails with [`SimError::TimerBusy`] while the timer is already running.
    pub fn start_timer(&mut self, id: TimerId, timeout: impl Into<TimeVal>) -> Result<()> {
        self.timers.start(id, TimeVal::now(), timeout.into())
    }

    /// Disarms `id`. Stopping a timer that is not running does nothing.
    pub fn stop_timer(&mut self, id: TimerId) -> Result<()> {
        self.timers.stop(id)
    }

    pub fn free_timer(&mut self, id: TimerId) -> Result<()> {
        self.timers.free(id)
    }

    pub fn timer_running(&self, id: TimerId) -> bool {
        self.timers.is_running(id)
    }

    /// Allocated timers, running or not.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Absolute deadline of a running timer.
    pub fn timer_deadline(&self, id: TimerId) -> Option<TimeVal> {
        self.timers.deadline(id)
    }

    /// Makes `run_forever` return after the current iteration.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped || self.wake.stop_requested()
    }

    /// Waits for readiness, timer expiry or `timeout`, then dispatches.
    ///
    /// Every ready descriptor callback runs before the due timer callbacks,
    /// all synchronously on the calling thread. `None` waits without limit.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<RunStatus> {
        let now = TimeVal::now();
        let timer_wait = self.timers.next_deadline().map(|d| now.until(d));
        let wait = match (timeout, timer_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        self.poller.clear();
        self.polled.clear();
        self.poller.push(self.wake.fd());
        for (slot, registration) in self.registrations.iter() {
            if registration.removed {
                continue;
            }
            self.poller.push(registration.fd);
            self.polled.push(RegistrationId {
                slot,
                serial: registration.serial,
            });
        }

        match self.poller.wait(wait) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(RunStatus::Interrupted);
            }
            Err(err) => {
                error!(%err, "wait for descriptor readiness failed");
                return Err(err.into());
            }
        }

        let woken = self.poller.is_ready(0);
        if woken {
            self.wake.drain();
        }

        let ready: Vec<RegistrationId> = self
            .polled
            .iter()
            .enumerate()
            .filter(|(i, _)| self.poller.is_ready(i + 1))
            .map(|(_, id)| *id)
            .collect();

        self.dispatching = true;
        let mut dispatched = 0;
        for id in ready {
            if self.dispatch(id) {
                dispatched += 1;
            }
        }
        dispatched += self.expire_timers();
        self.dispatching = false;
        self.release_pending();

        Ok(if dispatched > 0 {
            RunStatus::Ready
        } else if woken {
            RunStatus::Interrupted
        } else {
            RunStatus::TimedOut
        })
    }

    /// Repeats [`run_once`](Self::run_once) until a callback calls
    /// [`stop`](Self::stop) or another thread calls [`ReactorWaker::stop`].
    ///
    /// A cross-thread stop issued before entry still ends the loop. It is
    /// consumed on return, so a later call runs again.
    pub fn run_forever(&mut self) -> Result<()> {
        self.stopped = false;

        while !self.is_stopped() {
            self.run_once(None)?;
        }

        self.stopped = true;
        self.wake.clear_stop();
        Ok(())
    }

    fn dispatch(&mut self, id: RegistrationId) -> bool {
        // A callback earlier in this step may have removed the registration.
        let Some(registration) = self
            .registrations
            .get_mut(id.slot)
            .filter(|r| r.serial == id.serial && !r.removed)
        else {
            return false;
        };
        let fd = registration.fd;
        let Some(mut source) = registration.source.take() else {
            return false;
        };

        source.ready(self, fd, id);

        match self.registrations.get_mut(id.slot) {
            Some(registration) if registration.serial == id.serial => {
                if registration.removed {
                    self.registrations.remove(id.slot);
                    self.pending_free.push((fd, source));
                } else {
                    registration.source = Some(source);
                }
            }
            _ => self.pending_free.push((fd, source)),
        }

        self.release_pending();
        true
    }

    fn expire_timers(&mut self) -> usize {
        let now = TimeVal::now();
        let mut fired = 0;

        for id in self.timers.expired(now) {
            let Some(mut on_expire) = self.timers.begin_expiry(id, now) else {
                continue;
            };
            on_expire(self, id);
            self.timers.end_expiry(id, on_expire);
            self.release_pending();
            fired += 1;
        }

        fired
    }

    fn release_pending(&mut self) {
        while let Some((fd, mut source)) = self.pending_free.pop() {
            source.freed(fd);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        for slot in self.registrations.keys() {
            if let Some(registration) = self.registrations.remove(slot)
                && let Some(source) = registration.source
            {
                self.pending_free.push((registration.fd, source));
            }
        }
        self.release_pending();
    }
}
