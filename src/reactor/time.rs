//! Second/microsecond time values with carry-normalized deadline arithmetic.
//!
//! Timers and timed condition waits both compute an absolute wall-clock
//! deadline as `now + timeout`. The microsecond field of a [`TimeVal`] is kept
//! in `[0, 1_000_000)`; any overflow from the addition rolls into seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const USEC_PER_SEC: i64 = 1_000_000;

/// A point in time, or a span, as whole seconds plus microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i64,
}

impl TimeVal {
    pub const ZERO: TimeVal = TimeVal { sec: 0, usec: 0 };

    pub const fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from(since_epoch)
    }

    /// Absolute deadline `self + timeout`.
    ///
    /// Microseconds at or above one second are carried into the seconds field
    /// until the result is normalized, so a timeout of `(1, 500_000)` from
    /// `(10, 900_000)` lands on `(12, 400_000)`.
    pub fn deadline_after(self, timeout: TimeVal) -> TimeVal {
        let mut sec = self.sec + timeout.sec;
        let mut usec = self.usec + timeout.usec;
        while usec >= USEC_PER_SEC {
            usec -= USEC_PER_SEC;
            sec += 1;
        }
        TimeVal { sec, usec }
    }

    /// Time left from `self` until `later`, zero if `later` has passed.
    pub fn until(self, later: TimeVal) -> Duration {
        if later <= self {
            return Duration::ZERO;
        }
        let mut sec = later.sec - self.sec;
        let mut usec = later.usec - self.usec;
        if usec < 0 {
            usec += USEC_PER_SEC;
            sec -= 1;
        }
        Duration::new(sec as u64, (usec * 1_000) as u32)
    }

    pub(crate) fn to_timespec(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.sec as libc::time_t,
            tv_nsec: (self.usec * 1_000) as _,
        }
    }
}

impl From<Duration> for TimeVal {
    fn from(duration: Duration) -> Self {
        TimeVal {
            sec: duration.as_secs() as i64,
            usec: duration.subsec_micros() as i64,
        }
    }
}
