//! Error types for the simulator core.
//!
//! Setup-time failures bubble up to the binary entry point and terminate the
//! process. Per-connection and per-packet failures are handled at the
//! component that detected them and never cross a reactor callback boundary,
//! so they rarely surface as a [`SimError`] at all.

use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Simulator error types
#[derive(Debug, Error)]
pub enum SimError {
    /// I/O error from a socket, pipe or terminal call
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A table could not grow to hold a new record
    #[error("allocation failed")]
    AllocationFailed,

    /// The file descriptor already has a live registration
    #[error("file descriptor {0} is already registered")]
    DuplicateRegistration(RawFd),

    /// The registration handle does not name a live registration
    #[error("unknown registration")]
    UnknownRegistration,

    /// The timer handle does not name an allocated timer
    #[error("unknown timer")]
    UnknownTimer,

    /// The timer is already running
    #[error("timer is already running")]
    TimerBusy,

    /// Real-time scheduling could not be applied to a new thread
    #[error("unable to set thread scheduling: {0}")]
    Scheduling(io::Error),

    /// Invalid configuration contents
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for the expected layout
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A socket could not be created, bound, listened on or connected during startup
    #[error("{what}: {source}")]
    Setup {
        what: String,
        #[source]
        source: io::Error,
    },
}

impl SimError {
    /// Wraps a startup I/O failure with a description of the step that failed.
    pub fn setup(what: impl Into<String>, source: io::Error) -> Self {
        SimError::Setup {
            what: what.into(),
            source,
        }
    }

    /// Check if the error happened while bringing the simulator up.
    ///
    /// Startup failures are fatal: there is no partial-startup mode.
    pub fn is_fatal_at_setup(&self) -> bool {
        matches!(
            self,
            SimError::Setup { .. } | SimError::Config(_) | SimError::ConfigParse(_)
        )
    }
}

impl From<std::collections::TryReserveError> for SimError {
    fn from(_: std::collections::TryReserveError) -> Self {
        SimError::AllocationFailed
    }
}
