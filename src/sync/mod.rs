//! Reentrant lock and condition variable over the native pthread primitives.
//!
//! These are the only primitives shared state may be touched through when a
//! spawned native thread and the reactor thread both need it.

mod condition;
mod lock;

pub use condition::{Condition, WaitStatus};
pub use lock::{Lock, LockGuard};

use std::sync::atomic::{AtomicUsize, Ordering};

/// Identity of the calling thread, stable for its lifetime and never zero.
pub(crate) fn current_thread_token() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);

    thread_local! {
        static TOKEN: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }

    TOKEN.with(|token| *token)
}
