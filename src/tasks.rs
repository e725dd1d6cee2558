//! Worker pools.

/// Fixed-size pool of interchangeable workers.
///
/// The pool only counts: it never holds the work itself. `busy` never
/// exceeds `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPool {
    capacity: usize,
    busy: usize,
}

impl TaskPool {
    /// Creates a pool with `capacity` idle workers.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self { capacity, busy: 0 }
    }

    /// Takes a worker if one is idle. Returns false and changes nothing
    /// when every worker is busy.
    pub fn acquire_one(&mut self) -> bool {
        if self.busy < self.capacity {
            self.busy += 1;
            true
        } else {
            false
        }
    }

    /// Gives a worker back.
    ///
    /// # Panics
    ///
    /// Panics when no worker is busy.
    pub fn release_one(&mut self) {
        assert!(self.busy > 0, "release_one called on a pool with no busy worker");
        self.busy -= 1;
    }

    /// Number of idle workers.
    #[must_use]
    pub const fn available(&self) -> usize {
        self.capacity - self.busy
    }

    /// Number of busy workers.
    #[must_use]
    pub const fn busy(&self) -> usize {
        self.busy
    }

    /// Total number of workers.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true when at least one worker is idle.
    #[must_use]
    pub const fn has_idle(&self) -> bool {
        self.busy < self.capacity
    }

    /// Fraction of busy workers, in `[0.0, 1.0]`. An empty pool reports 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilisation(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.busy as f64 / self.capacity as f64
        }
    }
}
