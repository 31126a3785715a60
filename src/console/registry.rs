use crate::console::session::ConsoleSession;
use crate::error::Result;
use crate::reactor::{Reactor, RegistrationId};
use crate::utils::slab::Slab;

use tracing::debug;

/// Stable handle to a session in a [`ConsoleRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    slot: usize,
    serial: u64,
}

struct Entry {
    serial: u64,
    session: ConsoleSession,
    registration: Option<RegistrationId>,
}

/// Every open console session, with O(1) insert and removal.
#[derive(Default)]
pub struct ConsoleRegistry {
    entries: Slab<Entry>,
    next_serial: u64,
}

impl ConsoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure the next [`insert`](Self::insert) will not need to grow.
    pub fn reserve(&mut self) -> Result<()> {
        self.entries.reserve_one()
    }

    pub fn insert(&mut self, session: ConsoleSession) -> Result<SessionKey> {
        self.next_serial += 1;
        let serial = self.next_serial;
        let slot = self.entries.insert(Entry {
            serial,
            session,
            registration: None,
        })?;

        Ok(SessionKey { slot, serial })
    }

    /// Records the reactor registration to drop when the session is removed.
    pub fn attach(&mut self, key: SessionKey, registration: RegistrationId) {
        if let Some(entry) = self.entry_mut(key) {
            entry.registration = Some(registration);
        }
    }

    pub fn session_mut(&mut self, key: SessionKey) -> Option<&mut ConsoleSession> {
        self.entry_mut(key).map(|e| &mut e.session)
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.entries
            .get(key.slot)
            .is_some_and(|e| e.serial == key.serial)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.entries
            .iter()
            .map(|(slot, e)| SessionKey {
                slot,
                serial: e.serial,
            })
            .collect()
    }

    /// Stops watching the session's input and closes its output.
    ///
    /// # Panics
    ///
    /// Removing a session that is not in the registry is a defect in the
    /// caller and panics.
    pub fn remove(&mut self, reactor: &mut Reactor, key: SessionKey) {
        if !self.contains(key) {
            panic!("console session removed twice");
        }
        let Some(mut entry) = self.entries.remove(key.slot) else {
            return;
        };

        if let Some(registration) = entry.registration {
            let _ = reactor.deregister(registration);
        }
        entry.session.output().close();
        debug!(sessions = self.entries.len(), "console session closed");
    }

    /// Removes every session.
    pub fn shutdown_all(&mut self, reactor: &mut Reactor) {
        for key in self.keys() {
            self.remove(reactor, key);
        }
    }

    fn entry_mut(&mut self, key: SessionKey) -> Option<&mut Entry> {
        self.entries
            .get_mut(key.slot)
            .filter(|e| e.serial == key.serial)
    }
}
