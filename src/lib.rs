//! Transport and scheduling core for a baseboard management controller
//! simulator.
//!
//! The core moves bytes and time; a protocol [`Engine`](engine::Engine)
//! plugged in on top decides what they mean. Everything runs on one reactor
//! thread except work explicitly handed to a native thread.
//!
//! # Architecture
//!
//! - **Reactor**: poll-based readiness dispatch, one-shot timers and a
//!   cross-thread waker
//! - **Sync**: reentrant lock and condition variable shared with native threads
//! - **Thread**: native thread spawning with optional real-time priority,
//!   and a blocking sleeper
//! - **Channel**: LAN datagram sockets and the single-peer serial link
//! - **Console**: telnet and terminal consoles with line editing, and their registry
//! - **Tick**: the once-a-second heartbeat
//! - **Simulator**: the context that owns all of the above

pub mod channel;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod reactor;
pub mod sim;
pub mod sync;
pub mod thread;
pub mod tick;
mod utils;

pub use config::SimConfig;
pub use engine::{Engine, SharedEngine};
pub use error::{Result, SimError};
pub use reactor::{Reactor, RunStatus};
pub use sim::{SimOptions, Simulator};
