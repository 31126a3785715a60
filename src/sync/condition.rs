use crate::error::Result;
use crate::reactor::time::TimeVal;
use crate::sync::Lock;

use libc::{
    ETIMEDOUT, pthread_cond_broadcast, pthread_cond_destroy, pthread_cond_init,
    pthread_cond_signal, pthread_cond_t, pthread_cond_timedwait, pthread_cond_wait,
};
use std::cell::UnsafeCell;
use std::io;
use std::ptr;
use std::time::Duration;

/// How a condition wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// Woken by a signal, a broadcast, or spuriously. Re-check the predicate.
    Woken,
    /// The absolute wake time passed.
    TimedOut,
}

/// Condition variable used together with a held [`Lock`].
pub struct Condition {
    cond: Box<UnsafeCell<pthread_cond_t>>,
}

unsafe impl Send for Condition {}
unsafe impl Sync for Condition {}

impl Condition {
    pub fn new() -> Result<Self> {
        let cond = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed::<pthread_cond_t>() }));
        let rv = unsafe { pthread_cond_init(cond.get(), ptr::null()) };
        if rv != 0 {
            return Err(io::Error::from_raw_os_error(rv).into());
        }
        Ok(Self { cond })
    }

    /// Atomically releases `lock`, waits, and re-acquires it.
    ///
    /// The caller must own `lock`. Its reentrancy depth is restored on return.
    pub fn wait(&self, lock: &Lock) -> Result<WaitStatus> {
        let depth = lock.suspend_ownership();
        let rv = unsafe { pthread_cond_wait(self.cond.get(), lock.raw()) };
        lock.resume_ownership(depth);

        if rv != 0 {
            return Err(io::Error::from_raw_os_error(rv).into());
        }
        Ok(WaitStatus::Woken)
    }

    /// Like [`wait`](Self::wait) but gives up at `now + timeout`.
    ///
    /// The wake time is an absolute wall-clock deadline built with the same
    /// carry normalization the reactor's timers use.
    pub fn wait_timeout(&self, lock: &Lock, timeout: Duration) -> Result<WaitStatus> {
        let deadline = TimeVal::now().deadline_after(TimeVal::from(timeout));
        let spec = deadline.to_timespec();

        let depth = lock.suspend_ownership();
        let rv = unsafe { pthread_cond_timedwait(self.cond.get(), lock.raw(), &spec) };
        lock.resume_ownership(depth);

        match rv {
            0 => Ok(WaitStatus::Woken),
            ETIMEDOUT => Ok(WaitStatus::TimedOut),
            rv => Err(io::Error::from_raw_os_error(rv).into()),
        }
    }

    /// Wakes one waiter.
    pub fn signal(&self) {
        unsafe {
            pthread_cond_signal(self.cond.get());
        }
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        unsafe {
            pthread_cond_broadcast(self.cond.get());
        }
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        unsafe {
            pthread_cond_destroy(self.cond.get());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn wait_timeout_expires_without_signal() {
        let lock = Lock::new().unwrap();
        let cond = Condition::new().unwrap();

        let _guard = lock.lock();
        let start = Instant::now();
        let status = cond.wait_timeout(&lock, Duration::from_millis(30)).unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(lock.count(), 1);
    }

    #[test]
    fn signal_wakes_waiter_observing_predicate() {
        let shared = Arc::new((
            Lock::new().unwrap(),
            Condition::new().unwrap(),
            AtomicBool::new(false),
        ));

        let waiter = shared.clone();
        let handle = thread::spawn(move || {
            let (lock, cond, ready) = &*waiter;
            let _guard = lock.lock();
            while !ready.load(Ordering::SeqCst) {
                cond.wait_timeout(lock, Duration::from_secs(5)).unwrap();
            }
            lock.count()
        });

        {
            let (lock, cond, ready) = &*shared;
            let _guard = lock.lock();
            ready.store(true, Ordering::SeqCst);
            cond.signal();
        }

        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn wait_restores_reentrant_depth() {
        let shared = Arc::new((
            Lock::new().unwrap(),
            Condition::new().unwrap(),
            AtomicBool::new(false),
        ));

        let waiter = shared.clone();
        let handle = thread::spawn(move || {
            let (lock, cond, ready) = &*waiter;
            lock.acquire();
            lock.acquire();
            while !ready.load(Ordering::SeqCst) {
                cond.wait(lock).unwrap();
            }
            let depth = lock.count();
            lock.release();
            lock.release();
            depth
        });

        {
            let (lock, cond, ready) = &*shared;
            let _guard = lock.lock();
            ready.store(true, Ordering::SeqCst);
            cond.broadcast();
        }

        assert_eq!(handle.join().unwrap(), 2);
    }

    #[test]
    fn broadcast_wakes_all_waiters() {
        let shared = Arc::new((
            Lock::new().unwrap(),
            Condition::new().unwrap(),
            AtomicBool::new(false),
            AtomicUsize::new(0),
        ));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let waiter = shared.clone();
                thread::spawn(move || {
                    let (lock, cond, go, done) = &*waiter;
                    let _guard = lock.lock();
                    while !go.load(Ordering::SeqCst) {
                        cond.wait_timeout(lock, Duration::from_secs(5)).unwrap();
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        {
            let (lock, cond, go, _) = &*shared;
            let _guard = lock.lock();
            go.store(true, Ordering::SeqCst);
            cond.broadcast();
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.3.load(Ordering::SeqCst), 3);
    }
}
