use crate::error::Result;
use crate::sync::current_thread_token;

use libc::{
    pthread_mutex_destroy, pthread_mutex_init, pthread_mutex_lock, pthread_mutex_t,
    pthread_mutex_unlock,
};
use std::cell::UnsafeCell;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reentrant mutex with owner tracking.
///
/// The owning thread may acquire again without blocking; the underlying
/// mutex is released only when the count drops back to zero. Releasing from
/// a thread that does not own the lock, releasing more often than acquiring,
/// and dropping a held lock are defects and panic.
pub struct Lock {
    // Boxed so the pthread mutex never moves after initialization.
    mutex: Box<UnsafeCell<pthread_mutex_t>>,
    // The owner is always written before the count, so a non-zero count
    // observed by the owning thread pairs with its own token.
    owner: AtomicUsize,
    count: AtomicUsize,
}

unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

/// Releases one level of a [`Lock`] when dropped.
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl Lock {
    pub fn new() -> Result<Self> {
        let mutex = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed::<pthread_mutex_t>() }));
        let rv = unsafe { pthread_mutex_init(mutex.get(), ptr::null()) };
        if rv != 0 {
            return Err(io::Error::from_raw_os_error(rv).into());
        }

        Ok(Self {
            mutex,
            owner: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        })
    }

    /// Acquires the lock, or bumps the count if the caller already owns it.
    pub fn acquire(&self) {
        let me = current_thread_token();

        if self.count.load(Ordering::Acquire) == 0 || self.owner.load(Ordering::Acquire) != me {
            let rv = unsafe { pthread_mutex_lock(self.mutex.get()) };
            if rv != 0 {
                panic!("lock acquire failed: {}", io::Error::from_raw_os_error(rv));
            }
        }

        self.owner.store(me, Ordering::Release);
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one level of ownership, unlocking the mutex at zero.
    pub fn release(&self) {
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            panic!("lock count went negative");
        }
        if self.owner.load(Ordering::Acquire) != current_thread_token() {
            panic!("lock release by non-owner");
        }

        self.count.store(count - 1, Ordering::Release);
        if count == 1 {
            let rv = unsafe { pthread_mutex_unlock(self.mutex.get()) };
            if rv != 0 {
                self.count.store(count, Ordering::Release);
                panic!("lock release failed: {}", io::Error::from_raw_os_error(rv));
            }
        }
    }

    /// Acquires and returns a guard that releases on drop.
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// Current reentrancy depth. Zero means unlocked.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.count() > 0 && self.owner.load(Ordering::Acquire) == current_thread_token()
    }

    pub(crate) fn raw(&self) -> *mut pthread_mutex_t {
        self.mutex.get()
    }

    /// Hands full ownership to a condition wait, returning the depth to restore.
    pub(crate) fn suspend_ownership(&self) -> usize {
        if !self.is_held_by_current_thread() {
            panic!("condition wait without holding the lock");
        }
        self.count.swap(0, Ordering::AcqRel)
    }

    /// Reclaims ownership after the native wait re-locked the mutex.
    pub(crate) fn resume_ownership(&self, count: usize) {
        self.owner.store(current_thread_token(), Ordering::Release);
        self.count.store(count, Ordering::Release);
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.count.load(Ordering::Acquire) != 0 && !std::thread::panicking() {
            panic!("destroy of lock when count is not zero");
        }
        unsafe {
            pthread_mutex_destroy(self.mutex.get());
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
