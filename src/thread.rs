//! Native threads for blocking work that must stay off the reactor thread.
//!
//! [`spawn`] starts a thread, optionally under real-time FIFO scheduling.
//! [`Sleeper`] is a blocking delay: the waiting thread sleeps on a
//! [`Condition`] and consumes no reactor input while it does.
//!
//! # Example
//! ```ignore
//! use bmcsim::thread::{Sleeper, spawn};
//! use std::time::Duration;
//!
//! let sleeper = Sleeper::new()?;
//! let worker = sleeper.clone();
//! spawn(0, move || {
//!     worker.sleep(Duration::from_millis(100)).ok();
//! })?;
//! ```

use crate::error::{Result, SimError};
use crate::reactor::time::TimeVal;
use crate::sync::{Condition, Lock, WaitStatus};

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Starts `entry` on a new native thread.
///
/// A nonzero `priority` requests `SCHED_FIFO` at that priority before
/// `entry` runs. If the scheduling class cannot be obtained the thread exits
/// without running `entry` and the failure is returned here.
pub fn spawn<F>(priority: i32, entry: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<io::Result<()>>(1);

    let handle = thread::Builder::new()
        .name("bmcsim-worker".into())
        .spawn(move || {
            let scheduled = if priority != 0 {
                set_realtime_priority(priority)
            } else {
                Ok(())
            };
            let proceed = scheduled.is_ok();
            let _ = tx.send(scheduled);

            if proceed {
                entry();
            }
        })?;

    match rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(SimError::Scheduling(err))
        }
        Err(_) => {
            let _ = handle.join();
            Err(SimError::Scheduling(io::Error::other(
                "thread exited before reporting its scheduling state",
            )))
        }
    }
}

fn set_realtime_priority(priority: i32) -> io::Result<()> {
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;

    let rv = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rv != 0 {
        return Err(io::Error::from_raw_os_error(rv));
    }

    debug!(priority, "worker thread running under SCHED_FIFO");
    Ok(())
}

/// How a [`Sleeper::sleep`] call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// [`Sleeper::interrupt`] cut the sleep short.
    Interrupted,
}

struct SleeperShared {
    lock: Lock,
    cond: Condition,
    interrupted: AtomicBool,
}

/// Blocking delay that ignores reactor input while it waits.
#[derive(Clone)]
pub struct Sleeper {
    shared: Arc<SleeperShared>,
}

impl Sleeper {
    pub fn new() -> Result<Self> {
        Ok(Self {
            shared: Arc::new(SleeperShared {
                lock: Lock::new()?,
                cond: Condition::new()?,
                interrupted: AtomicBool::new(false),
            }),
        })
    }

    /// Blocks the calling thread for `duration` or until interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<SleepOutcome> {
        let shared = &*self.shared;
        let deadline = TimeVal::now().deadline_after(TimeVal::from(duration));

        let _guard = shared.lock.lock();
        loop {
            if shared.interrupted.swap(false, Ordering::AcqRel) {
                return Ok(SleepOutcome::Interrupted);
            }

            let remaining = TimeVal::now().until(deadline);
            if remaining.is_zero() {
                return Ok(SleepOutcome::Elapsed);
            }

            // Spurious wake-ups loop back and re-check the deadline.
            if shared.cond.wait_timeout(&shared.lock, remaining)? == WaitStatus::TimedOut
                && !shared.interrupted.load(Ordering::Acquire)
            {
                return Ok(SleepOutcome::Elapsed);
            }
        }
    }

    /// Ends a sleep in progress on another thread.
    ///
    /// If nobody is sleeping, the next sleep returns immediately.
    pub fn interrupt(&self) {
        let shared = &*self.shared;
        let _guard = shared.lock.lock();
        shared.interrupted.store(true, Ordering::Release);
        shared.cond.broadcast();
    }

    /// Runs the delay on a dedicated native thread and calls `on_done` there.
    pub fn sleep_detached<F>(
        &self,
        priority: i32,
        duration: Duration,
        on_done: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnOnce(SleepOutcome) + Send + 'static,
    {
        let sleeper = self.clone();
        spawn(priority, move || {
            let outcome = sleeper.sleep(duration).unwrap_or(SleepOutcome::Interrupted);
            on_done(outcome);
        })
    }
}
