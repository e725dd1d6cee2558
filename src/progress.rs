//! Progress reporting across threads.
//!
//! The simulation loop is single-threaded. A display running on another
//! thread receives [`Progress`] messages through a bounded channel and never
//! touches simulation state. Sending never blocks: when the display falls
//! behind, updates are dropped and counted.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::clock::{Observer, SimTime};

/// One progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Current virtual time.
    pub now: SimTime,
    /// Virtual time at which the run stops.
    pub end: SimTime,
}

impl Progress {
    /// Completion in percent, clamped to 100.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.end == 0 || self.now >= self.end {
            return 100;
        }
        let percent = u128::from(self.now) * 100 / u128::from(self.end);
        u8::try_from(percent).unwrap_or(100)
    }
}

/// Observer that forwards updates to a channel.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: Sender<Progress>,
    dropped: u64,
    disconnected: bool,
}

impl ChannelObserver {
    /// Number of updates dropped because the channel was full or closed.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Returns true once the receiving side has gone away.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

impl Observer for ChannelObserver {
    fn update(&mut self, now: SimTime, end: SimTime) {
        if self.disconnected {
            self.dropped += 1;
            return;
        }
        match self.tx.try_send(Progress { now, end }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                self.disconnected = true;
                self.dropped += 1;
            }
        }
    }
}

/// Creates an observer and the receiver a display thread reads from.
#[must_use]
pub fn progress_channel(capacity: usize) -> (ChannelObserver, Receiver<Progress>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        ChannelObserver {
            tx,
            dropped: 0,
            disconnected: false,
        },
        rx,
    )
}
