//! Discrete-event clock.
//!
//! The clock owns virtual time and the set of pending events. Events are
//! plain values; whoever drives the clock decides what dispatching one
//! means. Nothing here looks at wall-clock time.

use std::collections::BTreeMap;

use tracing::trace;

/// Virtual time, in abstract simulation units.
pub type SimTime = u64;

/// Key for ordering pending events.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Sequence number (FIFO for events scheduled at the same time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    /// When this event fires.
    pub time: SimTime,
    /// Scheduling order, for deterministic tie-breaking.
    pub sequence: u64,
}

/// Receives progress updates after each dispatched event.
pub trait Observer {
    /// Called with the current virtual time and the end of the run.
    fn update(&mut self, now: SimTime, end: SimTime);
}

/// Observer that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn update(&mut self, _now: SimTime, _end: SimTime) {}
}

impl<F: FnMut(SimTime, SimTime)> Observer for F {
    fn update(&mut self, now: SimTime, end: SimTime) {
        self(now, end);
    }
}

/// Virtual clock with a deterministic pending-event set.
#[derive(Debug)]
pub struct Clock<E> {
    now: SimTime,
    sequence: u64,
    pending: BTreeMap<EventKey, E>,
    dispatched: u64,
}

impl<E> Default for Clock<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clock<E> {
    /// Creates a clock at time zero with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: 0,
            sequence: 0,
            pending: BTreeMap::new(),
            dispatched: 0,
        }
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of events dispatched so far.
    #[must_use]
    pub const fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Returns true when no event is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time of the earliest pending event.
    #[must_use]
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.pending.keys().next().map(|key| key.time)
    }

    /// Registers `event` to fire at `now + delay`. Returns the firing time.
    pub fn schedule(&mut self, delay: SimTime, event: E) -> SimTime {
        let time = self.now.saturating_add(delay);
        self.insert(time, event);
        time
    }

    /// Registers `event` to fire at the absolute time `time`.
    ///
    /// # Panics
    ///
    /// Panics if `time` lies in the past: time never moves backwards.
    pub fn schedule_at(&mut self, time: SimTime, event: E) {
        assert!(
            time >= self.now,
            "cannot schedule an event at {time}, clock is already at {}",
            self.now
        );
        self.insert(time, event);
    }

    fn insert(&mut self, time: SimTime, event: E) {
        let key = EventKey {
            time,
            sequence: self.sequence,
        };
        self.sequence += 1;
        trace!(now = self.now, at = time, sequence = key.sequence, "event scheduled");
        self.pending.insert(key, event);
    }

    /// Pops the earliest event if it fires no later than `limit`, advancing
    /// the clock to its timestamp.
    pub fn pop_until(&mut self, limit: SimTime) -> Option<(SimTime, E)> {
        let (&key, _) = self.pending.iter().next()?;
        if key.time > limit {
            return None;
        }
        let event = self.pending.remove(&key)?;
        self.now = key.time;
        self.dispatched += 1;
        Some((key.time, event))
    }

    /// Moves the clock forward to `time` without dispatching anything.
    /// Earlier times are ignored.
    pub fn advance_to(&mut self, time: SimTime) {
        self.now = self.now.max(time);
    }

    /// Dispatches every event due no later than `limit`, in time order,
    /// calling `observer.update` after each one, then advances the clock to
    /// `limit`. Returns the number of events dispatched.
    ///
    /// This is the driver for a clock whose handler needs nothing but the
    /// clock itself. `Simulation::run_until` owns its clock next to the
    /// state its events touch, so it drives the same loop through
    /// [`Clock::pop_until`] and [`Clock::advance_to`] and adds its work
    /// budget between events.
    pub fn run_until<F>(&mut self, limit: SimTime, observer: &mut dyn Observer, mut dispatch: F) -> u64
    where
        F: FnMut(&mut Self, E),
    {
        let mut count = 0;
        while let Some((_, event)) = self.pop_until(limit) {
            dispatch(self, event);
            count += 1;
            observer.update(self.now, limit);
        }
        self.advance_to(limit);
        count
    }
}
