//! Timer records owned by the reactor.
//!
//! A timer is allocated once with its expiry callback and then armed and
//! disarmed any number of times. Each arm produces at most one expiry.

use crate::error::{Result, SimError};
use crate::reactor::core::Reactor;
use crate::reactor::time::TimeVal;
use crate::utils::slab::Slab;

/// Expiry callback. Runs on the reactor thread from the dispatch step.
pub type TimerCallback = Box<dyn FnMut(&mut Reactor, TimerId)>;

/// Handle to an allocated timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId {
    slot: usize,
    serial: u64,
}

pub(crate) struct TimerEntry {
    serial: u64,
    deadline: TimeVal,
    running: bool,
    freed: bool,
    on_expire: Option<TimerCallback>,
}

#[derive(Default)]
pub(crate) struct TimerTable {
    entries: Slab<TimerEntry>,
    next_serial: u64,
}

impl TimerTable {
    pub(crate) fn alloc(&mut self, on_expire: TimerCallback) -> Result<TimerId> {
        self.next_serial += 1;
        let serial = self.next_serial;

        let slot = self.entries.insert(TimerEntry {
            serial,
            deadline: TimeVal::ZERO,
            running: false,
            freed: false,
            on_expire: Some(on_expire),
        })?;

        Ok(TimerId { slot, serial })
    }

    fn entry_mut(&mut self, id: TimerId) -> Result<&mut TimerEntry> {
        self.entries
            .get_mut(id.slot)
            .filter(|e| e.serial == id.serial && !e.freed)
            .ok_or(SimError::UnknownTimer)
    }

    /// Arms the timer for `now + timeout`.
    pub(crate) fn start(&mut self, id: TimerId, now: TimeVal, timeout: TimeVal) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if entry.running {
            return Err(SimError::TimerBusy);
        }

        entry.deadline = now.deadline_after(timeout);
        entry.running = true;

        Ok(())
    }

    pub(crate) fn stop(&mut self, id: TimerId) -> Result<()> {
        self.entry_mut(id)?.running = false;
        Ok(())
    }

    pub(crate) fn free(&mut self, id: TimerId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.running = false;
        entry.freed = true;

        // While its callback runs the handler is out of the table; the slot
        // is reclaimed when the callback hands it back.
        if entry.on_expire.is_some() {
            self.entries.remove(id.slot);
        }

        Ok(())
    }

    pub(crate) fn is_running(&self, id: TimerId) -> bool {
        self.entries
            .get(id.slot)
            .is_some_and(|e| e.serial == id.serial && !e.freed && e.running)
    }

    pub(crate) fn deadline(&self, id: TimerId) -> Option<TimeVal> {
        self.entries
            .get(id.slot)
            .filter(|e| e.serial == id.serial && e.running)
            .map(|e| e.deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn next_deadline(&self) -> Option<TimeVal> {
        self.entries
            .iter()
            .filter(|(_, e)| e.running)
            .map(|(_, e)| e.deadline)
            .min()
    }

    /// Running timers whose deadline is at or before `now`, earliest first.
    pub(crate) fn expired(&self, now: TimeVal) -> Vec<TimerId> {
        let mut due: Vec<(TimeVal, TimerId)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.running && e.deadline <= now)
            .map(|(slot, e)| {
                (
                    e.deadline,
                    TimerId {
                        slot,
                        serial: e.serial,
                    },
                )
            })
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Disarms a due timer and lends out its callback.
    ///
    /// Returns `None` when an earlier callback in the same dispatch step
    /// stopped or freed the timer.
    pub(crate) fn begin_expiry(&mut self, id: TimerId, now: TimeVal) -> Option<TimerCallback> {
        let entry = self.entry_mut(id).ok()?;
        if !entry.running || entry.deadline > now {
            return None;
        }
        entry.running = false;
        entry.on_expire.take()
    }

    /// Returns a lent callback, reclaiming the slot if it was freed meanwhile.
    pub(crate) fn end_expiry(&mut self, id: TimerId, on_expire: TimerCallback) {
        match self.entries.get_mut(id.slot) {
            Some(entry) if entry.serial == id.serial => {
                if entry.freed {
                    self.entries.remove(id.slot);
                } else {
                    entry.on_expire = Some(on_expire);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TimerCallback {
        Box::new(|_, _| {})
    }

    #[test]
    fn start_while_running_is_busy() {
        let mut table = TimerTable::default();
        let id = table.alloc(noop()).unwrap();

        table.start(id, TimeVal::new(10, 0), TimeVal::new(1, 0)).unwrap();
        assert!(matches!(
            table.start(id, TimeVal::new(10, 0), TimeVal::new(1, 0)),
            Err(SimError::TimerBusy)
        ));

        table.stop(id).unwrap();
        table.start(id, TimeVal::new(10, 0), TimeVal::new(2, 0)).unwrap();
        assert_eq!(table.deadline(id), Some(TimeVal::new(12, 0)));
    }

    #[test]
    fn start_normalizes_deadline() {
        let mut table = TimerTable::default();
        let id = table.alloc(noop()).unwrap();
        table
            .start(id, TimeVal::new(10, 900_000), TimeVal::new(1, 500_000))
            .unwrap();
        assert_eq!(table.deadline(id), Some(TimeVal::new(12, 400_000)));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut table = TimerTable::default();
        let id = table.alloc(noop()).unwrap();
        table.stop(id).unwrap();
        table.stop(id).unwrap();
        assert!(!table.is_running(id));
    }

    #[test]
    fn expired_never_reports_future_deadlines() {
        let mut table = TimerTable::default();
        let early = table.alloc(noop()).unwrap();
        let late = table.alloc(noop()).unwrap();
        table.start(late, TimeVal::new(0, 0), TimeVal::new(5, 0)).unwrap();
        table.start(early, TimeVal::new(0, 0), TimeVal::new(1, 0)).unwrap();

        assert!(table.expired(TimeVal::new(0, 999_999)).is_empty());
        assert_eq!(table.expired(TimeVal::new(1, 0)), vec![early]);
        assert_eq!(table.expired(TimeVal::new(9, 0)), vec![early, late]);
    }

    #[test]
    fn one_expiry_per_start() {
        let mut table = TimerTable::default();
        let id = table.alloc(noop()).unwrap();
        table.start(id, TimeVal::new(0, 0), TimeVal::new(1, 0)).unwrap();

        let now = TimeVal::new(2, 0);
        let cb = table.begin_expiry(id, now).expect("due");
        table.end_expiry(id, cb);
        assert!(table.begin_expiry(id, now).is_none());
        assert!(table.expired(now).is_empty());
    }

    #[test]
    fn free_during_expiry_reclaims_slot() {
        let mut table = TimerTable::default();
        let id = table.alloc(noop()).unwrap();
        table.start(id, TimeVal::new(0, 0), TimeVal::new(0, 1)).unwrap();

        let cb = table.begin_expiry(id, TimeVal::new(1, 0)).unwrap();
        table.free(id).unwrap();
        assert_eq!(table.len(), 1);
        table.end_expiry(id, cb);
        assert_eq!(table.len(), 0);
        assert!(matches!(table.stop(id), Err(SimError::UnknownTimer)));
    }
}
