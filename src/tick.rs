//! Once-a-second heartbeat that drives the engine's time-based state.

use crate::channel::ChannelId;
use crate::engine::SharedEngine;
use crate::error::Result;
use crate::reactor::{Reactor, TimerId};

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{error, trace};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A self re-arming reactor timer.
///
/// Each expiry gives every LAN channel its protocol tick, then the engine
/// its global tick, then arms the timer again.
pub struct PeriodicTick {
    timer: Option<TimerId>,
    count: Rc<Cell<u64>>,
}

impl PeriodicTick {
    pub fn start(
        reactor: &mut Reactor,
        lan_channels: Vec<ChannelId>,
        engine: SharedEngine,
    ) -> Result<Self> {
        Self::with_interval(reactor, TICK_INTERVAL, lan_channels, engine)
    }

    /// Like [`start`](Self::start) with a custom period. The engine is still
    /// told a whole number of seconds elapsed, never less than one.
    pub fn with_interval(
        reactor: &mut Reactor,
        interval: Duration,
        lan_channels: Vec<ChannelId>,
        engine: SharedEngine,
    ) -> Result<Self> {
        let elapsed = interval.as_secs().clamp(1, u64::from(u32::MAX)) as u32;
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();

        let timer = reactor.alloc_timer(move |reactor, id| {
            counter.set(counter.get() + 1);
            trace!(tick = counter.get(), "periodic tick");

            {
                let mut engine = engine.borrow_mut();
                for channel in &lan_channels {
                    engine.channel_tick(*channel, elapsed);
                }
                engine.tick(elapsed);
            }

            if let Err(err) = reactor.start_timer(id, interval) {
                error!(%err, "unable to re-arm the periodic tick");
                reactor.stop();
            }
        })?;
        reactor.start_timer(timer, interval)?;

        Ok(Self {
            timer: Some(timer),
            count,
        })
    }

    /// Number of ticks delivered so far.
    pub fn ticks(&self) -> u64 {
        self.count.get()
    }

    pub fn cancel(&mut self, reactor: &mut Reactor) {
        if let Some(timer) = self.timer.take() {
            let _ = reactor.free_timer(timer);
        }
    }
}
