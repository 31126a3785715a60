//! Readiness-driven reactor.
//!
//! This module provides the event loop the rest of the simulator runs on:
//! - [`core`]: descriptor registration and the dispatch loop
//! - [`timer`]: one-shot timers armed against absolute deadlines
//! - [`time`]: carry-normalized second/microsecond arithmetic
//! - [`wake`]: cross-thread interruption of a blocking wait
//!
//! All callbacks run one at a time on the thread that drives
//! [`Reactor::run_once`] or [`Reactor::run_forever`].

pub mod core;
pub(crate) mod poller;
pub mod time;
pub mod timer;
pub mod wake;

pub use self::core::{EventSource, Reactor, RegistrationId, RunStatus};
pub use time::TimeVal;
pub use timer::TimerId;
pub use wake::ReactorWaker;
